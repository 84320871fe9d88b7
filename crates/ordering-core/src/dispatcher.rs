//! ============================================================================
//! Function-Call Dispatcher - remote function calls to local order state
//! ============================================================================
//! Each call maps to exactly one `CartAction` and writes exactly one log
//! entry (submit writes two). Unknown names are logged, never raised.
//!
//! With a remote cart, add/modify/remove go out as proxy commands and the
//! mirror waits for the realtime feed. A failed command demotes the cart to
//! local for the rest of the session and the action is applied locally.
//! ============================================================================

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::actions::{agent_param, CartAction, ItemParams};
use crate::backend::{CartCommands, ContactInfo, NewCartItem, ProxyAction, ProxyError};
use crate::cart::{Cart, CartChange};
use crate::store::{LogStore, TranscriptStore, DEFAULT_LOG_CAP, DEFAULT_TRANSCRIPT_CAP};
use crate::types::{Agent, CartLineItem, LogKind};

/// Everything the dispatcher mutates
#[derive(Debug)]
pub struct OrderState {
    pub logs: LogStore,
    pub transcript: TranscriptStore,
    pub cart: Cart,
    /// Contact-capture form revealed by the assistant
    pub contact_capture: bool,
    pub contact: ContactInfo,
    /// Agent used for the next call start
    pub agent: Agent,
}

impl Default for OrderState {
    fn default() -> Self {
        Self::with_caps(DEFAULT_LOG_CAP, DEFAULT_TRANSCRIPT_CAP)
    }
}

impl OrderState {
    pub fn with_caps(log_cap: usize, transcript_cap: usize) -> Self {
        Self {
            logs: LogStore::with_cap(log_cap),
            transcript: TranscriptStore::with_cap(transcript_cap),
            cart: Cart::local(),
            contact_capture: false,
            contact: ContactInfo::default(),
            agent: Agent::Demo,
        }
    }
}

/// Serializable view of the order state for display
#[derive(Debug, Clone, Serialize)]
pub struct OrderSnapshot {
    pub agent: Agent,
    pub remote_cart: bool,
    pub items: Vec<CartLineItem>,
    pub total: f64,
    pub contact_capture: bool,
    pub transcript: TranscriptStore,
    pub logs: LogStore,
}

/// Applies remote function calls to one session's order state
#[derive(Debug, Default)]
pub struct Dispatcher {
    state: OrderState,
}

impl Dispatcher {
    pub fn new(state: OrderState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &OrderState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut OrderState {
        &mut self.state
    }

    pub fn snapshot(&self) -> OrderSnapshot {
        OrderSnapshot {
            agent: self.state.agent,
            remote_cart: self.state.cart.is_remote(),
            items: self.state.cart.items().to_vec(),
            total: self.state.cart.total(),
            contact_capture: self.state.contact_capture,
            transcript: self.state.transcript.clone(),
            logs: self.state.logs.clone(),
        }
    }

    fn log(&mut self, kind: LogKind, message: impl Into<String>) {
        self.state.logs.append(kind, message);
    }

    /// Handle one remote function call; returns the action it mapped to
    pub async fn dispatch(&mut self, name: &str, params: &Map<String, Value>) -> CartAction {
        let action = CartAction::parse(name);
        info!("Function call '{}' -> {:?}", name, action);

        match &action {
            CartAction::AddItem => self.add_item(ItemParams::for_add(params)).await,
            CartAction::ModifyItem => self.modify_item(ItemParams::for_target(params)).await,
            CartAction::RemoveItem => self.remove_item(ItemParams::for_target(params)).await,
            CartAction::CaptureContact => {
                self.state.contact_capture = true;
                self.log(LogKind::RemoteFunction, "Email capture triggered");
            }
            CartAction::SubmitOrder => self.submit_order().await,
            CartAction::SwitchAgent => {
                let agent = agent_param(params);
                self.state.agent = agent;
                self.log(LogKind::System, format!("Switching to {} agent...", agent));
            }
            CartAction::ExportMenu => self.export_menu().await,
            CartAction::Unknown(raw) => {
                self.log(LogKind::RemoteFunction, format!("Function: {}", raw));
            }
        }

        action
    }

    /// Command channel and session id while the cart is remote
    fn remote_target(&self) -> Option<(Arc<dyn CartCommands>, String)> {
        self.state
            .cart
            .as_remote()
            .map(|remote| (remote.commands(), remote.session_id().to_string()))
    }

    /// Id of the first mirrored line named exactly `name`
    fn remote_item_id(&self, name: &str) -> Option<String> {
        self.state
            .cart
            .as_remote()
            .and_then(|remote| remote.find_by_name(name))
            .map(|item| item.id.clone())
    }

    fn fall_back(&mut self, action: ProxyAction, err: &ProxyError) {
        warn!("Cart proxy {} failed: {}", action, err);
        self.log(LogKind::ExternalApi, format!("{} failed: {}", action, err));
        if self.state.cart.demote_to_local() {
            self.log(LogKind::System, "Remote cart unavailable, continuing locally");
        }
    }

    async fn add_item(&mut self, params: ItemParams) {
        let Some(name) = params.name.clone() else {
            self.log(LogKind::RemoteFunction, "item-add skipped: missing item name");
            return;
        };

        if let Some((commands, session_id)) = self.remote_target() {
            let item = NewCartItem {
                name: name.clone(),
                size: params.size.clone(),
                modifications: params.modifications(),
                price: params.price,
            };
            match commands.add_item(&session_id, &item).await {
                Ok(_) => {
                    self.log(LogKind::RemoteFunction, format!("item-add: {}", name));
                    return;
                }
                Err(e) => self.fall_back(ProxyAction::AddItem, &e),
            }
        }

        if let Some(local) = self.state.cart.local_mut() {
            local.add(&name, params.modification, params.price);
        }
        self.log(LogKind::RemoteFunction, format!("item-add: {}", name));
    }

    async fn modify_item(&mut self, params: ItemParams) {
        let name = params.name.clone().unwrap_or_default();

        if let Some((commands, session_id)) = self.remote_target() {
            let Some(item_id) = self.remote_item_id(&name) else {
                self.log(LogKind::RemoteFunction, format!("Modified: {}", name));
                return;
            };
            match commands
                .modify_item(&session_id, &item_id, params.modifications())
                .await
            {
                Ok(_) => {
                    self.log(LogKind::RemoteFunction, format!("Modified: {}", name));
                    return;
                }
                Err(e) => self.fall_back(ProxyAction::ModifyItem, &e),
            }
        }

        if let Some(local) = self.state.cart.local_mut() {
            local.modify(&name, params.modification);
        }
        self.log(LogKind::RemoteFunction, format!("Modified: {}", name));
    }

    async fn remove_item(&mut self, params: ItemParams) {
        let name = params.name.unwrap_or_default();

        if let Some((commands, session_id)) = self.remote_target() {
            let Some(item_id) = self.remote_item_id(&name) else {
                self.log(LogKind::RemoteFunction, format!("Removed: {}", name));
                return;
            };
            match commands.remove_item(&session_id, &item_id).await {
                Ok(_) => {
                    self.log(LogKind::RemoteFunction, format!("Removed: {}", name));
                    return;
                }
                Err(e) => self.fall_back(ProxyAction::RemoveItem, &e),
            }
        }

        if let Some(local) = self.state.cart.local_mut() {
            local.remove(&name);
        }
        self.log(LogKind::RemoteFunction, format!("Removed: {}", name));
    }

    async fn export_menu(&mut self) {
        if let Some((commands, session_id)) = self.remote_target() {
            if let Err(e) = commands.export_menu(&session_id).await {
                warn!("Menu export failed: {}", e);
                self.log(LogKind::ExternalApi, format!("export-menu failed: {}", e));
            }
        }
        self.log(LogKind::RemoteFunction, "Menu data exported to agent");
    }

    async fn submit_order(&mut self) {
        if let Some((commands, session_id)) = self.remote_target() {
            if let Err(e) = commands.validate_order(&session_id, &self.state.contact).await {
                // Validation is advisory; the cart stays as it is
                warn!("Order validation failed: {}", e);
                self.log(LogKind::ExternalApi, format!("validate-order failed: {}", e));
            }
        }
        self.log(LogKind::ExternalApi, "Order validated & submitted");
        self.log(LogKind::System, "Sending receipt email...");
    }

    /// Feed a realtime change into a remote cart mirror
    pub fn apply_cart_change(&mut self, change: CartChange) -> bool {
        self.state.cart.apply_change(change)
    }

    /// Replace a remote mirror with a fetched snapshot
    pub fn load_cart_snapshot(&mut self, items: Vec<CartLineItem>) -> bool {
        match &mut self.state.cart {
            Cart::Remote(remote) => {
                remote.load_snapshot(items);
                true
            }
            Cart::Local(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::RecordingCommands;
    use serde_json::json;

    fn bag(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn remote_dispatcher(commands: Arc<RecordingCommands>) -> Dispatcher {
        let mut state = OrderState::default();
        state.cart = Cart::remote("sess-1", commands);
        Dispatcher::new(state)
    }

    #[tokio::test]
    async fn test_add_items_total() {
        let mut dispatcher = Dispatcher::default();
        let prices = [14.99, 5.5, 2.0, 0.25];
        for (i, price) in prices.iter().enumerate() {
            dispatcher
                .dispatch("add_item", &bag(json!({ "name": format!("Item {}", i), "price": price })))
                .await;
        }
        let cart = &dispatcher.state().cart;
        assert_eq!(cart.len(), prices.len());
        assert!((cart.total() - prices.iter().sum::<f64>()).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_pizza_scenario() {
        let mut dispatcher = Dispatcher::default();
        dispatcher
            .dispatch("add-item", &bag(json!({ "name": "Large Pepperoni Pizza", "price": 14.99 })))
            .await;
        dispatcher
            .dispatch("add-item", &bag(json!({ "name": "Garlic Bread", "price": 5.5 })))
            .await;
        assert_eq!(dispatcher.state().cart.len(), 2);
        assert!((dispatcher.state().cart.total() - 20.49).abs() < 1e-9);

        dispatcher
            .dispatch("remove-item", &bag(json!({ "item_name": "Garlic Bread" })))
            .await;
        assert_eq!(dispatcher.state().cart.len(), 1);
        assert!((dispatcher.state().cart.total() - 14.99).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_modify_miss_logs_once() {
        let mut dispatcher = Dispatcher::default();
        dispatcher
            .dispatch("addItem", &bag(json!({ "name": "Wings", "price": 8 })))
            .await;
        let before = dispatcher.state().cart.items().to_vec();
        let logs_before = dispatcher.state().logs.len();

        dispatcher
            .dispatch("modifyItem", &bag(json!({ "item_name": "Calzone", "modification": "well done" })))
            .await;

        assert_eq!(dispatcher.state().cart.items(), before.as_slice());
        assert_eq!(dispatcher.state().logs.len(), logs_before + 1);
    }

    #[tokio::test]
    async fn test_modify_hit_sets_modification() {
        let mut dispatcher = Dispatcher::default();
        dispatcher
            .dispatch("add_item", &bag(json!({ "name": "Wings", "price": 8 })))
            .await;
        dispatcher
            .dispatch("modify_item", &bag(json!({ "name": "Wings", "modification": "extra hot" })))
            .await;
        assert_eq!(
            dispatcher.state().cart.items()[0].modification.as_deref(),
            Some("extra hot")
        );
        assert_eq!(dispatcher.state().logs.latest().unwrap().message, "Modified: Wings");
    }

    #[tokio::test]
    async fn test_remove_then_add_same_name() {
        let mut dispatcher = Dispatcher::default();
        for _ in 0..2 {
            dispatcher
                .dispatch("add_item", &bag(json!({ "name": "Soda", "price": 2 })))
                .await;
        }
        dispatcher.dispatch("remove_item", &bag(json!({ "name": "Soda" }))).await;
        dispatcher
            .dispatch("add_item", &bag(json!({ "name": "Soda", "price": 2 })))
            .await;

        let sodas = dispatcher
            .state()
            .cart
            .items()
            .iter()
            .filter(|i| i.name == "Soda")
            .count();
        assert_eq!(sodas, 1);
    }

    #[tokio::test]
    async fn test_unknown_function_logs_only() {
        let mut dispatcher = Dispatcher::default();
        let action = dispatcher.dispatch("do_backflip", &Map::new()).await;

        assert_eq!(action, CartAction::Unknown("do_backflip".into()));
        assert!(dispatcher.state().cart.is_empty());
        assert!(dispatcher.state().transcript.is_empty());
        assert_eq!(dispatcher.state().logs.len(), 1);
        assert!(dispatcher.state().logs.latest().unwrap().message.contains("do_backflip"));
    }

    #[tokio::test]
    async fn test_submit_logs_two_entries() {
        let mut dispatcher = Dispatcher::default();
        dispatcher
            .dispatch("add_item", &bag(json!({ "name": "Wings", "price": 8 })))
            .await;
        dispatcher.dispatch("place_order", &Map::new()).await;

        let logs: Vec<_> = dispatcher.state().logs.entries().collect();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[1].kind, LogKind::ExternalApi);
        assert_eq!(logs[2].kind, LogKind::System);
        assert_eq!(dispatcher.state().cart.len(), 1);
    }

    #[tokio::test]
    async fn test_capture_and_switch() {
        let mut dispatcher = Dispatcher::default();
        dispatcher.state_mut().agent = Agent::Intro;

        dispatcher.dispatch("show_email", &Map::new()).await;
        assert!(dispatcher.state().contact_capture);

        dispatcher.dispatch("transfer_to_demo", &Map::new()).await;
        assert_eq!(dispatcher.state().agent, Agent::Demo);
        assert_eq!(dispatcher.state().logs.len(), 2);
    }

    #[tokio::test]
    async fn test_add_without_name_does_not_mutate() {
        let mut dispatcher = Dispatcher::default();
        dispatcher.dispatch("add_item", &bag(json!({ "price": 3 }))).await;
        assert!(dispatcher.state().cart.is_empty());
        assert_eq!(dispatcher.state().logs.len(), 1);
    }

    #[tokio::test]
    async fn test_remote_add_sends_one_command() {
        let commands = Arc::new(RecordingCommands::default());
        let mut dispatcher = remote_dispatcher(commands.clone());

        dispatcher
            .dispatch("add_item", &bag(json!({ "name": "Garlic Bread", "price": 5.5 })))
            .await;

        let calls = commands.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, ProxyAction::AddItem);
        assert_eq!(calls[0].1["session_id"], "sess-1");
        assert_eq!(calls[0].1["name"], "Garlic Bread");
        // Mirror only moves on realtime notifications
        assert!(dispatcher.state().cart.is_empty());
        assert!(dispatcher.state().cart.is_remote());

        dispatcher.apply_cart_change(CartChange::Insert(CartLineItem::new("r1", "Garlic Bread", 5.5)));
        assert_eq!(dispatcher.state().cart.len(), 1);
    }

    #[tokio::test]
    async fn test_remote_remove_targets_mirrored_id() {
        let commands = Arc::new(RecordingCommands::default());
        let mut dispatcher = remote_dispatcher(commands.clone());
        dispatcher.load_cart_snapshot(vec![CartLineItem::new("r7", "Soda", 2.0)]);

        dispatcher.dispatch("remove-item", &bag(json!({ "item_name": "Soda" }))).await;
        dispatcher.dispatch("remove-item", &bag(json!({ "item_name": "Calzone" }))).await;

        let calls = commands.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, ProxyAction::RemoveItem);
        assert_eq!(calls[0].1["item_id"], "r7");
        assert_eq!(dispatcher.state().cart.len(), 1);
        assert_eq!(dispatcher.state().logs.len(), 2);
    }

    #[tokio::test]
    async fn test_remote_failure_demotes_and_applies_locally() {
        let commands = Arc::new(RecordingCommands::failing());
        let mut dispatcher = remote_dispatcher(commands.clone());

        dispatcher
            .dispatch("add_item", &bag(json!({ "name": "Wings", "price": 8 })))
            .await;
        assert!(!dispatcher.state().cart.is_remote());
        assert_eq!(dispatcher.state().cart.len(), 1);
        assert_eq!(dispatcher.state().logs.latest().unwrap().message, "item-add: Wings");

        // Later calls stay local; no further proxy traffic
        dispatcher
            .dispatch("add_item", &bag(json!({ "name": "Soda", "price": 2 })))
            .await;
        assert_eq!(commands.calls().len(), 1);
        assert_eq!(dispatcher.state().cart.total(), 10.0);
    }

    #[tokio::test]
    async fn test_remote_modify_targets_first_match() {
        let commands = Arc::new(RecordingCommands::default());
        let mut dispatcher = remote_dispatcher(commands.clone());
        dispatcher.load_cart_snapshot(vec![
            CartLineItem::new("r1", "Wings", 8.0),
            CartLineItem::new("r2", "Wings", 8.0),
        ]);

        dispatcher
            .dispatch("modify-item", &bag(json!({ "item_name": "Wings", "modification": "extra hot" })))
            .await;

        let calls = commands.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, ProxyAction::ModifyItem);
        assert_eq!(calls[0].1["item_id"], "r1");
        assert_eq!(calls[0].1["modifications"], json!(["extra hot"]));
        // Mirror waits for the feed
        assert!(dispatcher.state().cart.items().iter().all(|i| i.modification.is_none()));
        assert_eq!(dispatcher.state().logs.latest().unwrap().message, "Modified: Wings");
    }

    #[tokio::test]
    async fn test_remote_modify_failure_applies_locally() {
        let commands = Arc::new(RecordingCommands::failing());
        let mut dispatcher = remote_dispatcher(commands.clone());
        dispatcher.load_cart_snapshot(vec![CartLineItem::new("r1", "Wings", 8.0)]);

        dispatcher
            .dispatch("modify_item", &bag(json!({ "item_name": "Wings", "modification": "no sauce" })))
            .await;

        assert_eq!(commands.calls().len(), 1);
        assert!(!dispatcher.state().cart.is_remote());
        assert_eq!(
            dispatcher.state().cart.items()[0].modification.as_deref(),
            Some("no sauce")
        );
        let logs: Vec<_> = dispatcher.state().logs.entries().map(|e| e.kind).collect();
        assert_eq!(logs, vec![LogKind::ExternalApi, LogKind::System, LogKind::RemoteFunction]);
    }

    #[tokio::test]
    async fn test_remote_remove_failure_applies_locally() {
        let commands = Arc::new(RecordingCommands::failing());
        let mut dispatcher = remote_dispatcher(commands.clone());
        dispatcher.load_cart_snapshot(vec![
            CartLineItem::new("r1", "Soda", 2.0),
            CartLineItem::new("r2", "Wings", 8.0),
        ]);

        dispatcher.dispatch("removeItem", &bag(json!({ "item_name": "Soda" }))).await;

        assert!(!dispatcher.state().cart.is_remote());
        assert_eq!(dispatcher.state().cart.len(), 1);
        assert_eq!(dispatcher.state().cart.items()[0].name, "Wings");
        assert_eq!(dispatcher.state().logs.latest().unwrap().message, "Removed: Soda");
    }

    #[tokio::test]
    async fn test_remote_export_menu_sends_command() {
        let commands = Arc::new(RecordingCommands::default());
        let mut dispatcher = remote_dispatcher(commands.clone());

        dispatcher.dispatch("menu_export", &Map::new()).await;

        let calls = commands.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, ProxyAction::ExportMenu);
        assert_eq!(dispatcher.state().logs.len(), 1);
        assert!(dispatcher.state().cart.is_remote());
    }

    #[tokio::test]
    async fn test_remote_submit_validates_with_contact() {
        let commands = Arc::new(RecordingCommands::default());
        let mut dispatcher = remote_dispatcher(commands.clone());
        dispatcher.state_mut().contact.email = Some("guest@example.com".into());

        dispatcher.dispatch("submit_order", &Map::new()).await;

        let calls = commands.calls();
        assert_eq!(calls[0].0, ProxyAction::ValidateOrder);
        assert_eq!(calls[0].1["email"], "guest@example.com");
        assert_eq!(dispatcher.state().logs.len(), 2);
    }
}
