//! ============================================================================
//! Cart - local list or read-only mirror of a remote cart
//! ============================================================================
//! The cart mode is picked once per session:
//! - Local: the dispatcher mutates the list directly
//! - Remote: the list mirrors a shared table and only changes when a
//!   `CartChange` notification arrives; mutations go out as proxy commands
//!
//! A remote cart can be demoted to a local one (seeded with the mirror) when
//! the proxy stops answering. There is no way back for that session.
//! ============================================================================

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::CartCommands;
use crate::types::CartLineItem;

/// Change notification from the realtime feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum CartChange {
    Insert(CartLineItem),
    Update(CartLineItem),
    Delete { id: String },
}

/// Cart owned by one ordering session
#[derive(Debug)]
pub enum Cart {
    Local(LocalCart),
    Remote(RemoteCart),
}

impl Default for Cart {
    fn default() -> Self {
        Cart::Local(LocalCart::default())
    }
}

impl Cart {
    pub fn local() -> Self {
        Cart::default()
    }

    pub fn remote(session_id: impl Into<String>, commands: Arc<dyn CartCommands>) -> Self {
        Cart::Remote(RemoteCart::new(session_id, commands))
    }

    pub fn items(&self) -> &[CartLineItem] {
        match self {
            Cart::Local(cart) => &cart.items,
            Cart::Remote(cart) => &cart.items,
        }
    }

    /// Sum of line totals, recomputed on every call
    pub fn total(&self) -> f64 {
        self.items().iter().map(CartLineItem::line_total).sum()
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Cart::Remote(_))
    }

    /// Mutable access for the local path. `None` while mirroring a remote cart.
    pub fn local_mut(&mut self) -> Option<&mut LocalCart> {
        match self {
            Cart::Local(cart) => Some(cart),
            Cart::Remote(_) => None,
        }
    }

    pub fn as_remote(&self) -> Option<&RemoteCart> {
        match self {
            Cart::Remote(cart) => Some(cart),
            Cart::Local(_) => None,
        }
    }

    /// Feed a realtime notification into the mirror. Local carts ignore it.
    pub fn apply_change(&mut self, change: CartChange) -> bool {
        match self {
            Cart::Remote(cart) => {
                cart.apply(change);
                true
            }
            Cart::Local(_) => {
                debug!("Ignoring realtime change for local cart");
                false
            }
        }
    }

    /// Switch a remote cart to local mode, keeping the mirrored items.
    /// Returns false if the cart was already local.
    pub fn demote_to_local(&mut self) -> bool {
        let items = match self {
            Cart::Remote(cart) => std::mem::take(&mut cart.items),
            Cart::Local(_) => return false,
        };
        info!("Demoting remote cart to local ({} items)", items.len());
        *self = Cart::Local(LocalCart::seeded(items));
        true
    }

    pub fn clear(&mut self) {
        match self {
            Cart::Local(cart) => cart.items.clear(),
            Cart::Remote(cart) => cart.items.clear(),
        }
    }
}

/// Mutable in-memory cart
#[derive(Debug, Default, Clone)]
pub struct LocalCart {
    items: Vec<CartLineItem>,
    next_seq: u64,
}

impl LocalCart {
    fn seeded(items: Vec<CartLineItem>) -> Self {
        Self { items, next_seq: 0 }
    }

    /// Append a new line. Duplicate names are kept as separate lines.
    pub fn add(&mut self, name: &str, modification: Option<String>, price: f64) -> &CartLineItem {
        let id = format!("{}-{}", Utc::now().timestamp_millis(), self.next_seq);
        self.next_seq += 1;
        self.items
            .push(CartLineItem::new(id, name, price).with_modification(modification));
        &self.items[self.items.len() - 1]
    }

    /// Set the modification on every line named exactly `name`
    pub fn modify(&mut self, name: &str, modification: Option<String>) -> usize {
        let mut matched = 0;
        for item in self.items.iter_mut().filter(|i| i.name == name) {
            item.modification = modification.clone();
            matched += 1;
        }
        matched
    }

    /// Remove every line named exactly `name`
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.items.len();
        self.items.retain(|i| i.name != name);
        before - self.items.len()
    }

    pub fn items(&self) -> &[CartLineItem] {
        &self.items
    }
}

/// Read-only mirror of a cart held by the backend
pub struct RemoteCart {
    session_id: String,
    items: Vec<CartLineItem>,
    commands: Arc<dyn CartCommands>,
}

impl std::fmt::Debug for RemoteCart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCart")
            .field("session_id", &self.session_id)
            .field("items", &self.items)
            .finish_non_exhaustive()
    }
}

impl RemoteCart {
    pub fn new(session_id: impl Into<String>, commands: Arc<dyn CartCommands>) -> Self {
        Self {
            session_id: session_id.into(),
            items: Vec::new(),
            commands,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn commands(&self) -> Arc<dyn CartCommands> {
        Arc::clone(&self.commands)
    }

    pub fn items(&self) -> &[CartLineItem] {
        &self.items
    }

    /// First line named exactly `name`
    pub fn find_by_name(&self, name: &str) -> Option<&CartLineItem> {
        self.items.iter().find(|i| i.name == name)
    }

    /// Replace the mirror with a fetched snapshot
    pub fn load_snapshot(&mut self, items: Vec<CartLineItem>) {
        debug!("Loaded cart snapshot for {} ({} items)", self.session_id, items.len());
        self.items = items;
    }

    /// Reconcile one notification by id. Insert and update both upsert;
    /// delete of an unknown id is a no-op. Arrival order wins.
    pub fn apply(&mut self, change: CartChange) {
        match change {
            CartChange::Insert(item) | CartChange::Update(item) => {
                match self.items.iter_mut().find(|i| i.id == item.id) {
                    Some(existing) => *existing = item,
                    None => self.items.push(item),
                }
            }
            CartChange::Delete { id } => {
                self.items.retain(|i| i.id != id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::RecordingCommands;

    fn remote() -> Cart {
        Cart::remote("sess-1", Arc::new(RecordingCommands::default()))
    }

    fn row(id: &str, name: &str, price: f64) -> CartLineItem {
        CartLineItem::new(id, name, price)
    }

    #[test]
    fn test_local_add_keeps_duplicates() {
        let mut cart = Cart::local();
        let local = cart.local_mut().unwrap();
        local.add("Garlic Bread", None, 5.5);
        local.add("Garlic Bread", None, 5.5);
        assert_eq!(cart.len(), 2);
        assert_ne!(cart.items()[0].id, cart.items()[1].id);
        assert_eq!(cart.total(), 11.0);
    }

    #[test]
    fn test_local_modify_and_remove_by_exact_name() {
        let mut cart = Cart::local();
        let local = cart.local_mut().unwrap();
        local.add("Large Pepperoni Pizza", None, 14.99);
        local.add("Garlic Bread", None, 5.5);

        assert_eq!(local.modify("garlic bread", Some("extra butter".into())), 0);
        assert_eq!(local.modify("Garlic Bread", Some("extra butter".into())), 1);
        assert_eq!(local.items()[1].modification.as_deref(), Some("extra butter"));

        assert_eq!(local.remove("Garlic Bread"), 1);
        assert_eq!(cart.len(), 1);
        assert!((cart.total() - 14.99).abs() < 1e-9);
    }

    #[test]
    fn test_remote_cart_rejects_local_mutation() {
        let mut cart = remote();
        assert!(cart.local_mut().is_none());
        assert!(cart.is_remote());
    }

    #[test]
    fn test_remote_reconcile_by_id() {
        let mut cart = remote();
        cart.apply_change(CartChange::Insert(row("a", "Wings", 8.0)));
        cart.apply_change(CartChange::Insert(row("b", "Soda", 2.0)));
        // Duplicate insert replaces rather than appends
        cart.apply_change(CartChange::Insert(row("a", "Wings", 9.0)));
        assert_eq!(cart.len(), 2);
        assert_eq!(cart.items()[0].price, 9.0);

        cart.apply_change(CartChange::Update(row("b", "Diet Soda", 2.5)));
        assert_eq!(cart.items()[1].name, "Diet Soda");

        cart.apply_change(CartChange::Delete { id: "a".into() });
        cart.apply_change(CartChange::Delete { id: "missing".into() });
        assert_eq!(cart.len(), 1);
        assert_eq!(cart.total(), 2.5);
    }

    #[test]
    fn test_update_before_insert_upserts() {
        let mut cart = remote();
        cart.apply_change(CartChange::Update(row("x", "Calzone", 11.0)));
        assert_eq!(cart.len(), 1);
        cart.apply_change(CartChange::Insert(row("x", "Calzone", 10.0)));
        assert_eq!(cart.len(), 1);
        assert_eq!(cart.items()[0].price, 10.0);
    }

    #[test]
    fn test_local_cart_ignores_changes() {
        let mut cart = Cart::local();
        assert!(!cart.apply_change(CartChange::Insert(row("a", "Wings", 8.0))));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_remote_total_uses_quantity() {
        let mut cart = remote();
        let mut wings = row("a", "Wings", 8.0);
        wings.quantity = 2;
        cart.apply_change(CartChange::Insert(wings));
        assert_eq!(cart.total(), 16.0);
    }

    #[test]
    fn test_demote_keeps_mirror() {
        let mut cart = remote();
        cart.apply_change(CartChange::Insert(row("a", "Wings", 8.0)));
        assert!(cart.demote_to_local());
        assert!(!cart.is_remote());
        assert_eq!(cart.len(), 1);
        cart.local_mut().unwrap().add("Soda", None, 2.0);
        assert_eq!(cart.total(), 10.0);
        assert!(!cart.demote_to_local());
    }

    #[test]
    fn test_change_wire_shape() {
        let change: CartChange =
            serde_json::from_value(serde_json::json!({ "type": "DELETE", "id": "42" })).unwrap();
        assert_eq!(change, CartChange::Delete { id: "42".into() });
    }
}
