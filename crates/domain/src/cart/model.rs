use chrono::{DateTime, Utc};
use common::{CustomerKey, Money, VariantId};
use serde::{Deserialize, Serialize};

/// One cart line, with the unit price seen when it was last touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub variant_id: VariantId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl CartLine {
    pub fn line_total(&self) -> Money {
        self.unit_price.times(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub owner: CustomerKey,
    pub lines: Vec<CartLine>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(owner: CustomerKey) -> Self {
        let now = Utc::now();
        Self {
            owner,
            lines: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, variant_id: VariantId) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.variant_id == variant_id)
    }

    pub fn quantity_of(&self, variant_id: VariantId) -> u32 {
        self.line(variant_id).map(|l| l.quantity).unwrap_or(0)
    }

    pub fn item_count(&self) -> u32 {
        self.lines
            .iter()
            .fold(0u32, |count, line| count.saturating_add(line.quantity))
    }

    pub fn subtotal(&self) -> Money {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    /// Sets the line's quantity and price, adding the line if missing.
    pub(crate) fn set_line(&mut self, variant_id: VariantId, quantity: u32, unit_price: Money) {
        match self.lines.iter_mut().find(|l| l.variant_id == variant_id) {
            Some(line) => {
                line.quantity = quantity;
                line.unit_price = unit_price;
            }
            None => self.lines.push(CartLine {
                variant_id,
                quantity,
                unit_price,
            }),
        }
        self.touch();
    }

    pub(crate) fn remove_line(&mut self, variant_id: VariantId) -> bool {
        let before = self.lines.len();
        self.lines.retain(|l| l.variant_id != variant_id);
        let removed = self.lines.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    pub(crate) fn clear(&mut self) {
        self.lines.clear();
        self.touch();
    }

    /// Folds `guest` into this cart: shared variants keep the larger
    /// quantity, the rest are copied.
    pub(crate) fn absorb(&mut self, guest: Cart) {
        for line in guest.lines {
            match self.lines.iter_mut().find(|l| l.variant_id == line.variant_id) {
                Some(existing) => existing.quantity = existing.quantity.max(line.quantity),
                None => self.lines.push(line),
            }
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChange {
    pub variant_id: VariantId,
    pub cart_price: Money,
    pub current_price: Money,
}

/// Advisory report on a cart against the live catalog and stock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartValidation {
    /// Lines the ledger could not supply right now.
    pub unavailable: Vec<VariantId>,
    /// Lines whose variant is gone or no longer for sale.
    pub inactive: Vec<VariantId>,
    /// Lines whose price moved by more than 10%.
    pub price_changed: Vec<PriceChange>,
}

impl CartValidation {
    pub fn is_valid(&self) -> bool {
        self.unavailable.is_empty() && self.inactive.is_empty() && self.price_changed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart_with(lines: &[(u64, u32)]) -> Cart {
        let mut cart = Cart::new(CustomerKey::guest("s"));
        for (id, quantity) in lines {
            cart.set_line(VariantId::new(*id), *quantity, Money::from_cents(100));
        }
        cart
    }

    #[test]
    fn absorb_keeps_max_and_copies_missing() {
        let mut user = cart_with(&[(1, 1), (2, 5)]);
        let guest = cart_with(&[(1, 2), (2, 3), (3, 1)]);

        user.absorb(guest);

        assert_eq!(user.quantity_of(VariantId::new(1)), 2);
        assert_eq!(user.quantity_of(VariantId::new(2)), 5);
        assert_eq!(user.quantity_of(VariantId::new(3)), 1);
    }

    #[test]
    fn subtotal_and_counts() {
        let cart = cart_with(&[(1, 2), (2, 3)]);
        assert_eq!(cart.subtotal(), Money::from_cents(500));
        assert_eq!(cart.item_count(), 5);
    }

    #[test]
    fn remove_missing_line_reports_false() {
        let mut cart = cart_with(&[(1, 1)]);
        assert!(!cart.remove_line(VariantId::new(9)));
        assert!(cart.remove_line(VariantId::new(1)));
        assert!(cart.is_empty());
    }
}
