//! C3 — escrow holds and the order state machine.

pub mod validation;

use escrow_core::constants::ESCROW_AUTO_RELEASE_HOURS;
use escrow_core::domain::{Dispute, DisputeStatus, EscrowHold, EscrowStatus, Order, OrderStatus};
use escrow_core::error::EscrowError;
use escrow_core::types::{DisputeId, EscrowId, LedgerAccountId, MinorUnits, OrderId, Timestamp, UserId, WalletId};
use escrow_state::StateDb;
use tracing::info;
pub use validation::Actor;

pub fn create_order(
    db: &StateDb,
    buyer_id: UserId,
    seller_id: UserId,
    amount_minor: MinorUnits,
    currency: &str,
    now: Timestamp,
) -> Result<Order, EscrowError> {
    if amount_minor <= 0 {
        return Err(EscrowError::InvalidAmount(format!("amount must be positive, got {amount_minor}")));
    }
    if buyer_id == seller_id {
        return Err(EscrowError::InvalidInput("buyer and seller must differ".into()));
    }
    let order = Order {
        id: OrderId::new(),
        buyer_id,
        seller_id,
        amount_minor,
        currency: currency.to_string(),
        status: OrderStatus::Created,
        auto_release_at: None,
        created_at: now,
        updated_at: now,
    };
    db.put_order(&order)?;
    info!(order_id = %order.id, "order created");
    Ok(order)
}

pub fn accept_order(db: &StateDb, order_id: OrderId, actor: Actor, now: Timestamp) -> Result<Order, EscrowError> {
    let mut order = db.get_order(&order_id)?.ok_or_else(|| EscrowError::OrderNotFound(order_id.to_string()))?;
    validation::authorize_seller_only(&order, actor, "accept_order")?;
    validation::check_order_transition(order.status, OrderStatus::Accepted)?;
    order.status = OrderStatus::Accepted;
    order.updated_at = now;
    db.put_order(&order)?;
    Ok(order)
}

pub fn cancel_order(db: &StateDb, order_id: OrderId, actor: Actor, now: Timestamp) -> Result<Order, EscrowError> {
    let mut order = db.get_order(&order_id)?.ok_or_else(|| EscrowError::OrderNotFound(order_id.to_string()))?;
    validation::authorize_order_action(&order, actor, "cancel_order")?;
    validation::check_order_transition(order.status, OrderStatus::Cancelled)?;
    order.status = OrderStatus::Cancelled;
    order.updated_at = now;
    db.put_order(&order)?;
    Ok(order)
}

/// Pay an accepted order: locks the buyer's wallet funds, opens an escrow
/// hold, and records the ledger movement from the buyer's wallet account
/// into the platform's escrow-holding account.
pub async fn pay_order(
    db: &StateDb,
    order_id: OrderId,
    actor: Actor,
    buyer_wallet_id: WalletId,
    seller_wallet_id: WalletId,
    escrow_holding_account: LedgerAccountId,
    now: Timestamp,
) -> Result<(Order, EscrowHold), EscrowError> {
    let mut order = db.get_order(&order_id)?.ok_or_else(|| EscrowError::OrderNotFound(order_id.to_string()))?;
    validation::authorize_buyer_only(&order, actor, "pay_order")?;
    validation::check_order_transition(order.status, OrderStatus::Paid)?;

    let buyer_wallet = db
        .get_wallet(&buyer_wallet_id)
        .and_then(|w| w.ok_or_else(|| EscrowError::WalletNotFound(buyer_wallet_id.to_string())))?;

    escrow_wallet::lock(db, buyer_wallet_id, order.amount_minor, now).await?;
    escrow_ledger::record_escrow_hold(
        db,
        buyer_wallet.ledger_account_id,
        escrow_holding_account,
        order.amount_minor,
        &format!("escrow-hold:{order_id}"),
        now,
    )?;

    let hold = EscrowHold {
        id: EscrowId::new(),
        order_id,
        buyer_wallet_id,
        seller_wallet_id,
        amount_minor: order.amount_minor,
        status: EscrowStatus::Held,
        created_at: now,
        released_at: None,
    };
    db.put_escrow(&hold)?;

    order.status = OrderStatus::Paid;
    order.auto_release_at = Some(now + chrono::Duration::hours(ESCROW_AUTO_RELEASE_HOURS));
    order.updated_at = now;
    db.put_order(&order)?;

    info!(order_id = %order_id, escrow_id = %hold.id, "order paid, escrow held");
    Ok((order, hold))
}

/// Release escrowed funds to the seller (buyer-confirmed or system
/// auto-release on timeout — both paths share this function; paying the
/// seller on timeout is intended policy here, not a bug).
pub async fn release_escrow(
    db: &StateDb,
    order_id: OrderId,
    actor: Actor,
    escrow_holding_account: LedgerAccountId,
    platform_fees_account: LedgerAccountId,
    fee_minor: MinorUnits,
    now: Timestamp,
) -> Result<(Order, EscrowHold), EscrowError> {
    let mut order = db.get_order(&order_id)?.ok_or_else(|| EscrowError::OrderNotFound(order_id.to_string()))?;
    validation::authorize_buyer_only(&order, actor, "release_escrow")?;
    validation::check_order_transition(order.status, OrderStatus::Released)?;

    let mut hold = db
        .find_escrow_for_order(&order_id)?
        .ok_or_else(|| EscrowError::EscrowNotFound(order_id.to_string()))?;
    validation::check_escrow_transition(hold.status, EscrowStatus::Released)?;

    let fee_minor = fee_minor.max(0);
    let to_seller_minor = hold.amount_minor - fee_minor;
    if to_seller_minor > 0 {
        escrow_wallet::transfer_locked(db, hold.buyer_wallet_id, hold.seller_wallet_id, to_seller_minor, now).await?;
    }
    if fee_minor > 0 {
        escrow_wallet::release_locked(db, hold.buyer_wallet_id, fee_minor, now).await?;
    }

    let seller_wallet = db
        .get_wallet(&hold.seller_wallet_id)?
        .ok_or_else(|| EscrowError::WalletNotFound(hold.seller_wallet_id.to_string()))?;
    escrow_ledger::record_escrow_release(
        db,
        escrow_holding_account,
        seller_wallet.ledger_account_id,
        platform_fees_account,
        hold.amount_minor,
        fee_minor,
        &format!("escrow-release:{order_id}"),
        now,
    )?;

    hold.status = EscrowStatus::Released;
    hold.released_at = Some(now);
    db.put_escrow(&hold)?;

    order.status = OrderStatus::Released;
    order.updated_at = now;
    db.put_order(&order)?;

    info!(order_id = %order_id, "escrow released to seller");
    Ok((order, hold))
}

/// System-driven release on timeout — auto-release-to-seller is intended
/// policy, invoked by the scheduler, not an accidental default.
pub async fn auto_release_escrow(
    db: &StateDb,
    order_id: OrderId,
    escrow_holding_account: LedgerAccountId,
    platform_fees_account: LedgerAccountId,
    fee_minor: MinorUnits,
    now: Timestamp,
) -> Result<(Order, EscrowHold), EscrowError> {
    release_escrow(
        db,
        order_id,
        Actor::System,
        escrow_holding_account,
        platform_fees_account,
        fee_minor,
        now,
    )
    .await
}

pub async fn refund_escrow(
    db: &StateDb,
    order_id: OrderId,
    actor: Actor,
    escrow_holding_account: LedgerAccountId,
    now: Timestamp,
) -> Result<(Order, EscrowHold), EscrowError> {
    let mut order = db.get_order(&order_id)?.ok_or_else(|| EscrowError::OrderNotFound(order_id.to_string()))?;
    validation::authorize_seller_or_system(&order, actor, "refund_escrow")?;
    validation::check_order_transition(order.status, OrderStatus::Refunded)?;

    let mut hold = db
        .find_escrow_for_order(&order_id)?
        .ok_or_else(|| EscrowError::EscrowNotFound(order_id.to_string()))?;
    validation::check_escrow_transition(hold.status, EscrowStatus::Refunded)?;

    escrow_wallet::unlock(db, hold.buyer_wallet_id, hold.amount_minor, now).await?;
    let buyer_wallet = db
        .get_wallet(&hold.buyer_wallet_id)?
        .ok_or_else(|| EscrowError::WalletNotFound(hold.buyer_wallet_id.to_string()))?;
    escrow_ledger::record_escrow_refund(
        db,
        escrow_holding_account,
        buyer_wallet.ledger_account_id,
        hold.amount_minor,
        &format!("escrow-refund:{order_id}"),
        now,
    )?;

    hold.status = EscrowStatus::Refunded;
    hold.released_at = Some(now);
    db.put_escrow(&hold)?;

    order.status = OrderStatus::Refunded;
    order.updated_at = now;
    db.put_order(&order)?;
    Ok((order, hold))
}

pub fn dispute_order(
    db: &StateDb,
    order_id: OrderId,
    actor: Actor,
    reason: &str,
    now: Timestamp,
) -> Result<(Order, Dispute), EscrowError> {
    let mut order = db.get_order(&order_id)?.ok_or_else(|| EscrowError::OrderNotFound(order_id.to_string()))?;
    validation::authorize_order_action(&order, actor, "dispute_order")?;
    validation::check_order_transition(order.status, OrderStatus::Disputed)?;

    let raised_by = match actor {
        Actor::User(id) => id,
        _ => order.buyer_id,
    };
    let dispute = Dispute {
        id: DisputeId::new(),
        order_id,
        raised_by,
        reason: reason.to_string(),
        status: DisputeStatus::Open,
        resolution_notes: None,
        created_at: now,
        resolved_at: None,
    };
    db.put_dispute(&dispute)?;

    if let Some(mut hold) = db.find_escrow_for_order(&order_id)? {
        validation::check_escrow_transition(hold.status, EscrowStatus::Disputed)?;
        hold.status = EscrowStatus::Disputed;
        db.put_escrow(&hold)?;
    }

    order.status = OrderStatus::Disputed;
    order.auto_release_at = None;
    order.updated_at = now;
    db.put_order(&order)?;
    Ok((order, dispute))
}

/// Resolution outcome chosen by an admin adjudicating a dispute.
pub enum DisputeResolution {
    Buyer,
    Seller,
    Split { to_buyer_minor: MinorUnits, to_seller_minor: MinorUnits },
}

pub async fn resolve_dispute(
    db: &StateDb,
    dispute_id: DisputeId,
    actor: Actor,
    resolution: DisputeResolution,
    platform_fee_minor: MinorUnits,
    notes: &str,
    escrow_holding_account: LedgerAccountId,
    platform_fees_account: LedgerAccountId,
    now: Timestamp,
) -> Result<Dispute, EscrowError> {
    let mut dispute = db
        .get_dispute(&dispute_id)?
        .ok_or_else(|| EscrowError::DisputeNotFound(dispute_id.to_string()))?;
    validation::authorize_admin_only(&dispute, actor, "resolve_dispute")?;

    let mut order = db
        .get_order(&dispute.order_id)?
        .ok_or_else(|| EscrowError::OrderNotFound(dispute.order_id.to_string()))?;
    let mut hold = db
        .find_escrow_for_order(&dispute.order_id)?
        .ok_or_else(|| EscrowError::EscrowNotFound(dispute.order_id.to_string()))?;

    let buyer_wallet = db
        .get_wallet(&hold.buyer_wallet_id)?
        .ok_or_else(|| EscrowError::WalletNotFound(hold.buyer_wallet_id.to_string()))?;
    let seller_wallet = db
        .get_wallet(&hold.seller_wallet_id)?
        .ok_or_else(|| EscrowError::WalletNotFound(hold.seller_wallet_id.to_string()))?;

    let platform_fee_minor = platform_fee_minor.max(0);
    let (to_buyer, to_seller, new_status, new_order_status, new_escrow_status) = match resolution {
        DisputeResolution::Buyer => (
            hold.amount_minor - platform_fee_minor,
            0,
            DisputeStatus::ResolvedBuyer,
            OrderStatus::Refunded,
            EscrowStatus::Refunded,
        ),
        DisputeResolution::Seller => (
            0,
            hold.amount_minor - platform_fee_minor,
            DisputeStatus::ResolvedSeller,
            OrderStatus::Released,
            EscrowStatus::Released,
        ),
        DisputeResolution::Split { to_buyer_minor, to_seller_minor } => {
            if to_buyer_minor + to_seller_minor + platform_fee_minor != hold.amount_minor {
                return Err(EscrowError::InvalidAmount(
                    "buyer_refund + seller_amount + platform_fee must equal the escrowed amount".into(),
                ));
            }
            (to_buyer_minor, to_seller_minor, DisputeStatus::ResolvedSplit, OrderStatus::Released, EscrowStatus::Released)
        }
    };

    validation::check_dispute_transition(dispute.status, new_status)?;
    validation::check_order_transition(order.status, new_order_status)?;
    validation::check_escrow_transition(hold.status, new_escrow_status)?;

    if to_buyer > 0 {
        escrow_wallet::unlock(db, hold.buyer_wallet_id, to_buyer, now).await?;
    }
    if to_seller > 0 {
        escrow_wallet::transfer_locked(db, hold.buyer_wallet_id, hold.seller_wallet_id, to_seller, now).await?;
    }
    if platform_fee_minor > 0 {
        escrow_wallet::release_locked(db, hold.buyer_wallet_id, platform_fee_minor, now).await?;
    }
    escrow_ledger::record_dispute_resolution(
        db,
        escrow_holding_account,
        buyer_wallet.ledger_account_id,
        seller_wallet.ledger_account_id,
        platform_fees_account,
        to_buyer,
        to_seller,
        platform_fee_minor,
        &format!("dispute-resolution:{dispute_id}"),
        now,
    )?;

    dispute.status = new_status;
    dispute.resolution_notes = Some(notes.to_string());
    dispute.resolved_at = Some(now);
    db.put_dispute(&dispute)?;

    hold.status = new_escrow_status;
    hold.released_at = Some(now);
    db.put_escrow(&hold)?;

    order.status = new_order_status;
    order.updated_at = now;
    db.put_order(&order)?;

    info!(dispute_id = %dispute_id, "dispute resolved");
    Ok(dispute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_core::domain::{LedgerAccount, Wallet};
    use escrow_core::types::LedgerAccountType;

    fn setup_wallet(db: &StateDb, user_id: UserId) -> (WalletId, LedgerAccountId) {
        let ledger_account_id = LedgerAccountId::new();
        db.put_ledger_account(&LedgerAccount {
            id: ledger_account_id,
            account_type: LedgerAccountType::UserWallet,
            owner_wallet_id: None,
            currency: "IDR".into(),
        })
        .unwrap();
        let wallet_id = WalletId::new();
        db.put_wallet(&Wallet {
            id: wallet_id,
            user_id,
            ledger_account_id,
            currency: "IDR".into(),
            available_minor: 1_000_000,
            locked_minor: 0,
            version: 0,
            updated_at: chrono::Utc::now(),
            last_reconciled_at: None,
            reconciliation_hash: None,
        })
        .unwrap();
        (wallet_id, ledger_account_id)
    }

    #[tokio::test]
    async fn happy_path_accept_pay_release() {
        let db = StateDb::open_temporary().unwrap();
        let now = chrono::Utc::now();
        let buyer = UserId::new();
        let seller = UserId::new();
        let (buyer_wallet, _) = setup_wallet(&db, buyer);
        let (seller_wallet, _) = setup_wallet(&db, seller);
        let escrow_account = LedgerAccountId::new();
        db.put_ledger_account(&LedgerAccount {
            id: escrow_account,
            account_type: LedgerAccountType::EscrowHolding,
            owner_wallet_id: None,
            currency: "IDR".into(),
        })
        .unwrap();
        let fees_account = LedgerAccountId::new();
        db.put_ledger_account(&LedgerAccount {
            id: fees_account,
            account_type: LedgerAccountType::PlatformFees,
            owner_wallet_id: None,
            currency: "IDR".into(),
        })
        .unwrap();

        let order = create_order(&db, buyer, seller, 50_000, "IDR", now).unwrap();
        let order = accept_order(&db, order.id, Actor::User(seller), now).unwrap();
        assert_eq!(order.status, OrderStatus::Accepted);

        let (order, _hold) = pay_order(&db, order.id, Actor::User(buyer), buyer_wallet, seller_wallet, escrow_account, now)
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Paid);

        let (order, hold) = release_escrow(&db, order.id, Actor::User(buyer), escrow_account, fees_account, 0, now)
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Released);
        assert_eq!(hold.status, EscrowStatus::Released);

        let seller_after = db.get_wallet(&seller_wallet).unwrap().unwrap();
        assert_eq!(seller_after.available_minor, 1_050_000);
    }

    #[tokio::test]
    async fn seller_cannot_release_own_escrow() {
        let db = StateDb::open_temporary().unwrap();
        let now = chrono::Utc::now();
        let buyer = UserId::new();
        let seller = UserId::new();
        let (buyer_wallet, _) = setup_wallet(&db, buyer);
        let (seller_wallet, _) = setup_wallet(&db, seller);
        let escrow_account = LedgerAccountId::new();
        db.put_ledger_account(&LedgerAccount {
            id: escrow_account,
            account_type: LedgerAccountType::EscrowHolding,
            owner_wallet_id: None,
            currency: "IDR".into(),
        })
        .unwrap();

        let order = create_order(&db, buyer, seller, 1_000, "IDR", now).unwrap();
        let order = accept_order(&db, order.id, Actor::User(seller), now).unwrap();
        let (order, _) = pay_order(&db, order.id, Actor::User(buyer), buyer_wallet, seller_wallet, escrow_account, now)
            .await
            .unwrap();

        let err = release_escrow(&db, order.id, Actor::User(seller), escrow_account, LedgerAccountId::new(), 0, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::NotAuthorized { .. }));
    }

    #[tokio::test]
    async fn resolve_dispute_splits_and_skims_platform_fee() {
        let db = StateDb::open_temporary().unwrap();
        let now = chrono::Utc::now();
        let buyer = UserId::new();
        let seller = UserId::new();
        let (buyer_wallet, _) = setup_wallet(&db, buyer);
        let (seller_wallet, _) = setup_wallet(&db, seller);
        let escrow_account = LedgerAccountId::new();
        db.put_ledger_account(&LedgerAccount {
            id: escrow_account,
            account_type: LedgerAccountType::EscrowHolding,
            owner_wallet_id: None,
            currency: "IDR".into(),
        })
        .unwrap();
        let fees_account = LedgerAccountId::new();
        db.put_ledger_account(&LedgerAccount {
            id: fees_account,
            account_type: LedgerAccountType::PlatformFees,
            owner_wallet_id: None,
            currency: "IDR".into(),
        })
        .unwrap();

        let order = create_order(&db, buyer, seller, 100_000, "IDR", now).unwrap();
        let order = accept_order(&db, order.id, Actor::User(seller), now).unwrap();
        let (order, _hold) = pay_order(&db, order.id, Actor::User(buyer), buyer_wallet, seller_wallet, escrow_account, now)
            .await
            .unwrap();
        let (_order, dispute) = dispute_order(&db, order.id, Actor::User(buyer), "item not as described", now).unwrap();

        let admin = UserId::new();
        let resolution = DisputeResolution::Split {
            to_buyer_minor: 40_000,
            to_seller_minor: 55_000,
        };
        let resolved = resolve_dispute(
            &db,
            dispute.id,
            Actor::Admin(admin),
            resolution,
            5_000,
            "split 40/55, 5k platform fee",
            escrow_account,
            fees_account,
            now,
        )
        .await
        .unwrap();
        assert_eq!(resolved.status, DisputeStatus::ResolvedSplit);

        let buyer_after = db.get_wallet(&buyer_wallet).unwrap().unwrap();
        let seller_after = db.get_wallet(&seller_wallet).unwrap().unwrap();
        assert_eq!(buyer_after.available_minor, 1_000_000 - 100_000 + 40_000);
        assert_eq!(buyer_after.locked_minor, 0);
        assert_eq!(seller_after.available_minor, 1_000_000 + 55_000);

        let order_after = db.get_order(&order.id).unwrap().unwrap();
        assert_eq!(order_after.status, OrderStatus::Released);
        assert_eq!(escrow_ledger::get_account_balance(&db, &fees_account).unwrap(), 5_000);
    }

    #[tokio::test]
    async fn resolve_dispute_rejects_split_not_summing_to_escrow_amount() {
        let db = StateDb::open_temporary().unwrap();
        let now = chrono::Utc::now();
        let buyer = UserId::new();
        let seller = UserId::new();
        let (buyer_wallet, _) = setup_wallet(&db, buyer);
        let (seller_wallet, _) = setup_wallet(&db, seller);
        let escrow_account = LedgerAccountId::new();
        db.put_ledger_account(&LedgerAccount {
            id: escrow_account,
            account_type: LedgerAccountType::EscrowHolding,
            owner_wallet_id: None,
            currency: "IDR".into(),
        })
        .unwrap();
        let fees_account = LedgerAccountId::new();

        let order = create_order(&db, buyer, seller, 10_000, "IDR", now).unwrap();
        let order = accept_order(&db, order.id, Actor::User(seller), now).unwrap();
        let (order, _hold) = pay_order(&db, order.id, Actor::User(buyer), buyer_wallet, seller_wallet, escrow_account, now)
            .await
            .unwrap();
        let (_order, dispute) = dispute_order(&db, order.id, Actor::User(buyer), "partial delivery", now).unwrap();

        let resolution = DisputeResolution::Split {
            to_buyer_minor: 4_000,
            to_seller_minor: 4_000,
        };
        let err = resolve_dispute(
            &db,
            dispute.id,
            Actor::Admin(UserId::new()),
            resolution,
            1_000,
            "doesn't add up",
            escrow_account,
            fees_account,
            now,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EscrowError::InvalidAmount(_)));
    }
}
