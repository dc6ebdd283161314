// ============================================================================
// Market Resolve Module - markets, betting and settlement
// ============================================================================
//
//   - markets: market creation, lookup, listing, closing
//   - betting: stake placement against an OPEN market
//   - settlement: parimutuel resolution and payout
//
// ============================================================================

pub mod betting;
pub mod markets;
pub mod settlement;

pub use betting::*;
pub use markets::*;
pub use settlement::*;
