//! Checkout intake: creates orders and starts their holds on payment.
//!
//! Fees are withheld from the seller. For each line:
//! ```text
//! subtotal = unit_price * quantity
//! fee      = floor(subtotal * platform_fee_rate)
//! hold     = subtotal - fee
//! ```
//! The buyer pays the order total; the seller is later credited `hold`.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use holdfast_ledger::WalletAccessor;
use holdfast_types::constants::ORDER_CODE_PREFIX;
use holdfast_types::{
    Amount, Clock, EntryKind, HoldStatus, HoldfastError, ItemStatus, LedgerRef, Order, OrderId,
    OrderItem, OrderItemId, OrderStatus, PaymentProvider, ProductId, Result, ShopId, UserId,
};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::collaborators::ShopDirectory;
use crate::order_store::OrderStore;

const ORDER_CODE_ATTEMPTS: usize = 3;

/// One requested line of a new order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLine {
    pub shop_id: ShopId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Amount,
}

/// Human-traceable order code: `HF-YYYYMMDD-XXXXXXXX`.
#[must_use]
pub fn order_code(id: OrderId, at: DateTime<Utc>) -> String {
    let hex = id.0.simple().to_string();
    let tail = hex.get(hex.len().saturating_sub(8)..).unwrap_or(&hex);
    format!(
        "{ORDER_CODE_PREFIX}-{}-{}",
        at.format("%Y%m%d"),
        tail.to_ascii_uppercase()
    )
}

/// Order intake on top of the order store and the wallet accessor.
pub struct Checkout {
    orders: Arc<dyn OrderStore>,
    wallets: WalletAccessor,
    shops: Arc<dyn ShopDirectory>,
    clock: Arc<dyn Clock>,
    fee_rate: Decimal,
}

impl fmt::Debug for Checkout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkout")
            .field("fee_rate", &self.fee_rate)
            .finish_non_exhaustive()
    }
}

impl Checkout {
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderStore>,
        wallets: WalletAccessor,
        shops: Arc<dyn ShopDirectory>,
        clock: Arc<dyn Clock>,
        fee_rate: Decimal,
    ) -> Self {
        Self {
            orders,
            wallets,
            shops,
            clock,
            fee_rate,
        }
    }

    /// Create an unpaid order. Items start `Unfunded`.
    ///
    /// # Errors
    /// [`HoldfastError::InvalidOrder`] for an empty order, a zero quantity or
    /// price, or a line whose seller share rounds to zero.
    /// [`HoldfastError::ShopNotFound`] for an unknown shop.
    pub async fn place_order(&self, customer: UserId, lines: &[OrderLine]) -> Result<Order> {
        if lines.is_empty() {
            return Err(invalid("order has no lines"));
        }
        for line in lines {
            self.shops.shop(line.shop_id).await?;
        }

        let now = self.clock.now();
        let mut last_err = None;
        for _ in 0..ORDER_CODE_ATTEMPTS {
            let (order, items) = self.build(customer, lines, now)?;
            let id = order.id;
            match self.orders.insert(order.clone(), items).await {
                Ok(()) => {
                    info!(order_id = %id, order_code = %order.order_code, total = %order.total_amount, fee = %order.fee_amount, "order placed");
                    return Ok(order);
                }
                Err(err @ HoldfastError::DuplicateOrderCode(_)) => {
                    warn!(order_code = %order.order_code, "order code collision; regenerating");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| HoldfastError::Internal("order code generation failed".into())))
    }

    /// Pay an order from the buyer's wallet.
    ///
    /// The Purchase debit is keyed by the order, so a retry never charges
    /// twice. Paying an order already paid by wallet returns it unchanged.
    ///
    /// # Errors
    /// [`HoldfastError::InsufficientFunds`] with nothing written.
    pub async fn pay_with_wallet(&self, order_id: OrderId) -> Result<Order> {
        let order = self.orders.order(order_id).await?;
        if order.status != OrderStatus::PendingPayment {
            if order.payment_provider == Some(PaymentProvider::Wallet) {
                return Ok(order);
            }
            return Err(HoldfastError::InvalidOrderTransition {
                order: order_id,
                from: order.status,
                to: OrderStatus::Paid,
            });
        }

        let wallet = self.wallets.wallet_of(order.customer_user_id).await?;
        let posting = self
            .wallets
            .debit(
                wallet.id,
                order.payable_amount,
                EntryKind::Purchase,
                LedgerRef::Order(order_id),
                format!("purchase {}", order.order_code),
            )
            .await?;

        match self
            .orders
            .mark_paid(order_id, PaymentProvider::Wallet, self.clock.now())
            .await
        {
            Ok(paid) => {
                info!(order_id = %order_id, entry_id = %posting.entry.id, amount = %order.payable_amount, "order paid from wallet");
                Ok(paid)
            }
            Err(err @ HoldfastError::InvalidOrderTransition { .. }) => {
                let current = self.orders.order(order_id).await?;
                if current.payment_provider == Some(PaymentProvider::Wallet) {
                    return Ok(current);
                }
                // Lost to a cancel or a gateway payment: give the money back.
                warn!(order_id = %order_id, status = %current.status, "order no longer payable after debit; returning purchase");
                self.wallets
                    .credit(
                        wallet.id,
                        order.payable_amount,
                        EntryKind::Refund,
                        LedgerRef::Order(order_id),
                        format!("purchase {} returned", order.order_code),
                    )
                    .await?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Mark an order paid by an external gateway.
    pub async fn confirm_external_payment(&self, order_id: OrderId, provider: &str) -> Result<Order> {
        let paid = self
            .orders
            .mark_paid(
                order_id,
                PaymentProvider::Gateway(provider.to_string()),
                self.clock.now(),
            )
            .await?;
        info!(order_id = %order_id, provider, "order paid via gateway");
        Ok(paid)
    }

    /// Cancel an unpaid order.
    pub async fn cancel(&self, order_id: OrderId) -> Result<Order> {
        let cancelled = self
            .orders
            .set_order_status(
                order_id,
                OrderStatus::PendingPayment,
                OrderStatus::Cancelled,
                self.clock.now(),
            )
            .await?;
        info!(order_id = %order_id, "order cancelled");
        Ok(cancelled)
    }

    /// Buyer confirmed delivery. The escrow window restarts now.
    pub async fn confirm_delivery(&self, item_id: OrderItemId) -> Result<OrderItem> {
        let item = self.orders.mark_delivered(item_id, self.clock.now()).await?;
        info!(item_id = %item_id, hold_at = ?item.hold_at, "delivery confirmed; escrow window restarted");
        Ok(item)
    }

    /// A complaint was filed: mark the item, and the order if still `Paid`.
    pub async fn mark_disputed(&self, item_id: OrderItemId) -> Result<OrderItem> {
        let now = self.clock.now();
        let item = self.orders.mark_item_disputed(item_id, now).await?;
        let order = self.orders.order(item.order_id).await?;
        if order.status == OrderStatus::Paid {
            self.orders
                .set_order_status(order.id, OrderStatus::Paid, OrderStatus::Disputed, now)
                .await?;
        }
        info!(item_id = %item_id, order_id = %item.order_id, "item disputed");
        Ok(item)
    }

    fn build(
        &self,
        customer: UserId,
        lines: &[OrderLine],
        now: DateTime<Utc>,
    ) -> Result<(Order, Vec<OrderItem>)> {
        let id = OrderId::new();
        let mut total = Amount::ZERO;
        let mut fees = Amount::ZERO;
        let mut items = Vec::with_capacity(lines.len());

        for line in lines {
            if line.quantity == 0 {
                return Err(invalid("quantity must be positive"));
            }
            if line.unit_price.is_zero() {
                return Err(invalid("unit price must be positive"));
            }
            let subtotal = line
                .unit_price
                .checked_mul(u64::from(line.quantity))
                .ok_or_else(|| invalid("line subtotal overflows"))?;
            let fee = subtotal
                .apply_rate_floor(self.fee_rate)
                .ok_or_else(|| invalid("fee computation overflows"))?;
            let hold = subtotal.saturating_sub(fee);
            if hold.is_zero() {
                return Err(invalid("seller share rounds to zero"));
            }
            total = total
                .checked_add(subtotal)
                .ok_or_else(|| invalid("order total overflows"))?;
            fees = fees
                .checked_add(fee)
                .ok_or_else(|| invalid("order fee overflows"))?;

            items.push(OrderItem {
                id: OrderItemId::new(),
                order_id: id,
                shop_id: line.shop_id,
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                subtotal,
                fee_amount: fee,
                hold_amount: hold,
                item_status: ItemStatus::WaitingDelivery,
                hold_status: HoldStatus::Unfunded,
                hold_at: None,
                settled_at: None,
                settled_by: None,
                settlement_entry: None,
                version: 0,
                created_at: now,
                updated_at: now,
            });
        }

        let order = Order {
            id,
            order_code: order_code(id, now),
            customer_user_id: customer,
            total_amount: total,
            fee_amount: fees,
            payable_amount: total,
            status: OrderStatus::PendingPayment,
            payment_provider: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        Ok((order, items))
    }
}

fn invalid(reason: &str) -> HoldfastError {
    HoldfastError::InvalidOrder {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryShopDirectory;
    use crate::order_store::InMemoryOrderStore;
    use holdfast_ledger::InMemoryLedgerStore;
    use holdfast_types::ManualClock;

    struct Fixture {
        checkout: Checkout,
        orders: Arc<InMemoryOrderStore>,
        wallets: WalletAccessor,
        shop: ShopId,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let orders = Arc::new(InMemoryOrderStore::new());
        let shops = Arc::new(InMemoryShopDirectory::new());
        let shop = shops.register(UserId::new(), "Paper Crane").unwrap().id;
        let wallets = WalletAccessor::new(Arc::new(InMemoryLedgerStore::new()), clock.clone());
        let fee_rate = Decimal::new(5, 2);
        let checkout = Checkout::new(orders.clone(), wallets.clone(), shops, clock, fee_rate);
        Fixture {
            checkout,
            orders,
            wallets,
            shop,
        }
    }

    fn line(shop: ShopId, quantity: u32, unit_price: u64) -> OrderLine {
        OrderLine {
            shop_id: shop,
            product_id: ProductId::new(),
            quantity,
            unit_price: Amount::new(unit_price),
        }
    }

    #[test]
    fn order_code_shape() {
        let code = order_code(OrderId::new(), Utc::now());
        let parts: Vec<&str> = code.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "HF");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[tokio::test]
    async fn fee_is_floored_and_withheld_from_seller() {
        let fx = fixture();
        let order = fx
            .checkout
            .place_order(UserId::new(), &[line(fx.shop, 3, 333), line(fx.shop, 1, 100_000)])
            .await
            .unwrap();
        // 999 * 5% = 49.95 -> 49; 100_000 * 5% = 5_000.
        assert_eq!(order.total_amount, Amount::new(100_999));
        assert_eq!(order.fee_amount, Amount::new(5_049));
        assert_eq!(order.payable_amount, order.total_amount);

        let items = fx.orders.items_of_order(order.id).await.unwrap();
        let holds: Vec<u64> = items.iter().map(|i| i.hold_amount.minor_units()).collect();
        assert!(holds.contains(&950));
        assert!(holds.contains(&95_000));
        assert!(items.iter().all(|i| i.hold_status == HoldStatus::Unfunded));
    }

    #[tokio::test]
    async fn invalid_lines_rejected() {
        let fx = fixture();
        let buyer = UserId::new();
        assert!(matches!(
            fx.checkout.place_order(buyer, &[]).await,
            Err(HoldfastError::InvalidOrder { .. })
        ));
        assert!(matches!(
            fx.checkout.place_order(buyer, &[line(fx.shop, 0, 10)]).await,
            Err(HoldfastError::InvalidOrder { .. })
        ));
        let stranger = ShopId::new();
        assert_eq!(
            fx.checkout.place_order(buyer, &[line(stranger, 1, 10)]).await,
            Err(HoldfastError::ShopNotFound(stranger))
        );
    }

    #[tokio::test]
    async fn wallet_payment_starts_holds_once() {
        let fx = fixture();
        let buyer = UserId::new();
        let wallet = fx.wallets.wallet_of(buyer).await.unwrap().id;
        fx.wallets.topup(wallet, Amount::new(5_000), "vnpay", "VNP-77").await.unwrap();

        let order = fx.checkout.place_order(buyer, &[line(fx.shop, 2, 1_000)]).await.unwrap();
        let paid = fx.checkout.pay_with_wallet(order.id).await.unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
        assert_eq!(paid.payment_provider, Some(PaymentProvider::Wallet));

        let again = fx.checkout.pay_with_wallet(order.id).await.unwrap();
        assert_eq!(again.status, OrderStatus::Paid);
        assert_eq!(fx.wallets.balance_of(wallet).await.unwrap(), Amount::new(3_000));

        let items = fx.orders.items_of_order(order.id).await.unwrap();
        assert!(items.iter().all(|i| i.is_holding() && i.hold_at == paid.paid_at));
    }

    #[tokio::test]
    async fn insufficient_wallet_leaves_order_unpaid() {
        let fx = fixture();
        let buyer = UserId::new();
        let order = fx.checkout.place_order(buyer, &[line(fx.shop, 1, 1_000)]).await.unwrap();
        let err = fx.checkout.pay_with_wallet(order.id).await.unwrap_err();
        assert!(matches!(err, HoldfastError::InsufficientFunds { .. }));
        let order = fx.orders.order(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::PendingPayment);

        fx.checkout.cancel(order.id).await.unwrap();
        assert!(fx.checkout.pay_with_wallet(order.id).await.is_err());
    }

    #[tokio::test]
    async fn dispute_marks_item_and_order() {
        let fx = fixture();
        let order = fx
            .checkout
            .place_order(UserId::new(), &[line(fx.shop, 1, 2_000)])
            .await
            .unwrap();
        fx.checkout.confirm_external_payment(order.id, "momo").await.unwrap();
        let item = fx.orders.items_of_order(order.id).await.unwrap()[0].clone();

        let disputed = fx.checkout.mark_disputed(item.id).await.unwrap();
        assert_eq!(disputed.item_status, ItemStatus::Disputed);
        assert!(disputed.is_holding());
        let order = fx.orders.order(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Disputed);
    }
}
