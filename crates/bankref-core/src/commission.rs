use crate::types::{CommissionRate, TransferDirection, UserProfile, UserRole};

/// Default rate when an exchange has nothing configured for the direction:
/// outgoing transfers carry the standard percentage fee, incoming transfers
/// are free until explicitly configured.
pub fn default_rate(direction: TransferDirection) -> CommissionRate {
    match direction {
        TransferDirection::Outgoing => CommissionRate::percentage(2.0),
        TransferDirection::Incoming => CommissionRate::fixed(0.0),
    }
}

/// Commission rate applicable to `user` for a transfer in `direction`.
///
/// Pure and deterministic: no I/O, no caching. Admins never pay commission,
/// regardless of anything stored on their record.
pub fn resolve_rate(user: &UserProfile, direction: TransferDirection) -> CommissionRate {
    if user.role == UserRole::Admin {
        return CommissionRate::percentage(0.0);
    }

    let configured = match direction {
        TransferDirection::Incoming => &user.commission_rates.incoming,
        TransferDirection::Outgoing => &user.commission_rates.outgoing,
    };

    match configured {
        Some(rate) if rate.is_well_formed() => rate.clone(),
        _ => default_rate(direction),
    }
}
