//! Role resolver - ordered decision list over two participants.
//!
//! Rules are evaluated in a fixed order and the first match wins:
//!
//! 1. **Influencer exception** - a non-earning woman writing to a male
//!    influencer pays him.
//! 2. **Heterosexual default** - in a man/woman pair the man always pays.
//! 3. **Low-popularity escape** - other pairs chat for free while either side
//!    is low-popularity with earn mode off.
//! 4. **Earn-mode asymmetry** - the earning side earns, otherwise the
//!    initiator pays.
//!
//! The order is a compliance requirement and must not change.

use crate::ids::UserId;
use crate::participant::{Gender, ParticipantContext};

use super::types::{
    ChatMode, ChatRoles, FreeMessageLimit, PricingPolicy, RoleRule, EARNER_SPLIT_PERCENT,
    PLATFORM_SPLIT_PERCENT, ROYAL_FREE_MESSAGES, ROYAL_WORDS_PER_TOKEN, STANDARD_FREE_MESSAGES,
    STANDARD_WORDS_PER_TOKEN,
};

/// Resolve roles with the default pricing policy.
pub fn resolve_roles(
    a: &ParticipantContext,
    b: &ParticipantContext,
    initiator: &UserId,
) -> ChatRoles {
    resolve_roles_with(&PricingPolicy::default(), a, b, initiator)
}

/// Resolve roles for a chat between `a` and `b` opened by `initiator`.
///
/// Total over every combination of inputs. If `initiator` matches neither
/// participant, `a` is treated as the initiator.
pub fn resolve_roles_with(
    policy: &PricingPolicy,
    a: &ParticipantContext,
    b: &ParticipantContext,
    initiator: &UserId,
) -> ChatRoles {
    let (init, recv) = if &b.user_id == initiator && &a.user_id != initiator {
        (b, a)
    } else {
        (a, b)
    };

    influencer_exception(policy, init, recv)
        .or_else(|| heterosexual_default(policy, init, recv))
        .or_else(|| low_popularity_escape(init, recv))
        .unwrap_or_else(|| earn_mode_asymmetry(policy, init, recv))
}

fn influencer_exception(
    policy: &PricingPolicy,
    init: &ParticipantContext,
    recv: &ParticipantContext,
) -> Option<ChatRoles> {
    let applies = init.gender == Gender::Female
        && recv.gender == Gender::Male
        && recv.influencer
        && !init.earn_mode;
    applies.then(|| user_earner(policy, init, recv, RoleRule::InfluencerException))
}

fn heterosexual_default(
    policy: &PricingPolicy,
    init: &ParticipantContext,
    recv: &ParticipantContext,
) -> Option<ChatRoles> {
    let (male, female) = match (init.gender, recv.gender) {
        (Gender::Male, Gender::Female) => (init, recv),
        (Gender::Female, Gender::Male) => (recv, init),
        _ => return None,
    };

    if female.earn_mode {
        Some(user_earner(policy, male, female, RoleRule::HeterosexualDefault))
    } else {
        // The woman's custom price is ignored when she does not earn.
        Some(platform_earner(policy, male, RoleRule::HeterosexualDefault))
    }
}

// Only reached for pairs that are not exactly {male, female}.
fn low_popularity_escape(
    init: &ParticipantContext,
    recv: &ParticipantContext,
) -> Option<ChatRoles> {
    (init.qualifies_for_free_chat() || recv.qualifies_for_free_chat()).then(|| free_chat(init))
}

fn earn_mode_asymmetry(
    policy: &PricingPolicy,
    init: &ParticipantContext,
    recv: &ParticipantContext,
) -> ChatRoles {
    let rule = RoleRule::EarnModeAsymmetry;
    match (init.earn_mode, recv.earn_mode) {
        (true, false) => user_earner(policy, recv, init, rule),
        (false, true) | (true, true) => user_earner(policy, init, recv, rule),
        (false, false) => platform_earner(policy, init, rule),
    }
}

fn user_earner(
    policy: &PricingPolicy,
    payer: &ParticipantContext,
    earner: &ParticipantContext,
    rule: RoleRule,
) -> ChatRoles {
    let (words_per_token, free_messages) = membership_rates(earner.royal_member);
    ChatRoles {
        payer_id: payer.user_id.clone(),
        earner_id: Some(earner.user_id.clone()),
        words_per_token,
        mode: ChatMode::Paid,
        free_message_limit: FreeMessageLimit::Limited(free_messages),
        price: policy.price_for(earner.price_override),
        platform_split_percent: PLATFORM_SPLIT_PERCENT,
        earner_split_percent: EARNER_SPLIT_PERCENT,
        rule,
    }
}

fn platform_earner(policy: &PricingPolicy, payer: &ParticipantContext, rule: RoleRule) -> ChatRoles {
    let (words_per_token, free_messages) = membership_rates(false);
    ChatRoles {
        payer_id: payer.user_id.clone(),
        earner_id: None,
        words_per_token,
        mode: ChatMode::Paid,
        free_message_limit: FreeMessageLimit::Limited(free_messages),
        price: policy.default_price,
        platform_split_percent: 100,
        earner_split_percent: 0,
        rule,
    }
}

fn free_chat(initiator: &ParticipantContext) -> ChatRoles {
    ChatRoles {
        payer_id: initiator.user_id.clone(),
        earner_id: None,
        words_per_token: STANDARD_WORDS_PER_TOKEN,
        mode: ChatMode::FreeLp,
        free_message_limit: FreeMessageLimit::Unbounded,
        price: 0,
        platform_split_percent: 0,
        earner_split_percent: 0,
        rule: RoleRule::LowPopularityEscape,
    }
}

/// `(words_per_token, free_messages)` for the earner's membership.
fn membership_rates(royal_member: bool) -> (u32, u32) {
    if royal_member {
        (ROYAL_WORDS_PER_TOKEN, ROYAL_FREE_MESSAGES)
    } else {
        (STANDARD_WORDS_PER_TOKEN, STANDARD_FREE_MESSAGES)
    }
}
