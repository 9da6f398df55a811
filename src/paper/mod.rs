// =============================================================================
// Paper-trading engine (C9)
// =============================================================================
//
// One portfolio holds many average-cost-basis positions, every mutation
// lands an immutable trade row, and a scoped risk gate blocks a trade before
// it touches cash.
// =============================================================================

pub mod balance;
pub mod engine;
pub mod portfolio;
pub mod position;
pub mod risk_gate;
pub mod trade;

pub use balance::{BalanceStore, PaperBalance};
pub use engine::PaperEngine;
pub use portfolio::PaperPortfolio;
pub use position::PaperPosition;
pub use risk_gate::PortfolioRiskGate;
pub use trade::{PaperTrade, TradeStatus};
