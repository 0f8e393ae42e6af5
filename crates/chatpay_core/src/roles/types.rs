//! Role types - the outcome of role resolution.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

pub const ROYAL_WORDS_PER_TOKEN: u32 = 7;
pub const STANDARD_WORDS_PER_TOKEN: u32 = 11;
pub const ROYAL_FREE_MESSAGES: u32 = 6;
pub const STANDARD_FREE_MESSAGES: u32 = 10;

/// Platform share when a real user earns.
pub const PLATFORM_SPLIT_PERCENT: u8 = 35;
/// Earner share when a real user earns.
pub const EARNER_SPLIT_PERCENT: u8 = 65;

/// Whether the chat can ever become billable.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    /// Low-popularity escape: the chat stays free forever.
    FreeLp,
    Paid,
}

/// Per-participant allowance of unbilled text messages.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FreeMessageLimit {
    Limited(u32),
    Unbounded,
}

impl FreeMessageLimit {
    /// Whether a participant who already used `used` free messages may send another.
    pub fn allows(&self, used: u32) -> bool {
        match self {
            Self::Limited(limit) => used < *limit,
            Self::Unbounded => true,
        }
    }

    /// Combined allowance of both participants, `None` when unbounded.
    pub fn aggregate(&self) -> Option<u32> {
        match self {
            Self::Limited(limit) => Some(limit.saturating_mul(2)),
            Self::Unbounded => None,
        }
    }
}

/// Which entry of the ordered decision list produced a `ChatRoles`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RoleRule {
    InfluencerException,
    HeterosexualDefault,
    LowPopularityEscape,
    EarnModeAsymmetry,
}

/// Monetization roles of one chat.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatRoles {
    pub payer_id: UserId,
    /// `None` means the platform is the earner.
    pub earner_id: Option<UserId>,
    pub words_per_token: u32,
    pub mode: ChatMode,
    pub free_message_limit: FreeMessageLimit,
    pub price: u64,
    pub platform_split_percent: u8,
    pub earner_split_percent: u8,
    pub rule: RoleRule,
}

impl ChatRoles {
    pub fn is_free(&self) -> bool {
        self.mode == ChatMode::FreeLp
    }

    pub fn platform_is_earner(&self) -> bool {
        self.earner_id.is_none()
    }

    pub fn is_payer(&self, user: &UserId) -> bool {
        &self.payer_id == user
    }

    pub fn is_earner(&self, user: &UserId) -> bool {
        self.earner_id.as_ref() == Some(user)
    }

    /// `floor(price × platformSplit / 100)`.
    pub fn platform_fee(&self) -> u64 {
        self.price * u64::from(self.platform_split_percent) / 100
    }

    /// Part of the price that is escrowed for the earner.
    pub fn escrow_amount(&self) -> u64 {
        self.price - self.platform_fee()
    }
}

/// Price bounds applied when reading a participant's custom price.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PricingPolicy {
    #[serde(default = "default_price")]
    pub default_price: u64,
    #[serde(default = "default_min_price")]
    pub min_price: u64,
    #[serde(default = "default_max_price")]
    pub max_price: u64,
}

fn default_price() -> u64 {
    100
}

fn default_min_price() -> u64 {
    100
}

fn default_max_price() -> u64 {
    500
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            default_price: default_price(),
            min_price: default_min_price(),
            max_price: default_max_price(),
        }
    }
}

impl PricingPolicy {
    /// Clamp an override into bounds, or fall back to the default price.
    ///
    /// Inverted bounds never panic; the ceiling wins.
    pub fn price_for(&self, price_override: Option<u64>) -> u64 {
        price_override
            .map(|price| price.max(self.min_price).min(self.max_price))
            .unwrap_or(self.default_price)
    }
}
