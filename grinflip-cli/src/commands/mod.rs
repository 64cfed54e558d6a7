pub mod house;
pub mod ledger;
pub mod play;
pub mod wallet;

pub use house::{handle_balance, handle_fund, handle_init, InitArgs};
pub use ledger::{handle_leaderboard, handle_recent, handle_stats, handle_wagers};
pub use play::{handle_flip, handle_reconcile, handle_verify, FlipArgs, VerifyArgs};
pub use wallet::{handle_wallet_command, WalletCommands};
