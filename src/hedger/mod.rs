//! Duration-risk hedging.
//!
//! A [`HedgeMachine`] steps one [`MarketSession`] per tick: enter a first leg
//! on the side nearest 0.50, hedge it on the opposite leg while the pair
//! still costs less than the profit ceiling, and unwind whatever cannot be
//! hedged before expiry.

mod machine;
pub mod pricing;
mod session;
mod state;

pub use machine::HedgeMachine;
pub use pricing::{EntryPlan, EntrySkip};
pub use session::{MarketSession, ProfitCounter, SessionSnapshot, SessionStats};
pub use state::{ForceClose, HedgeState, HedgeStateKind, RestingOrder};
