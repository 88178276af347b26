//! Command handlers for the Taxbot CLI.

pub mod ask;
pub mod chat;
pub mod knowledge;
pub mod route;

pub use ask::AskCommand;
pub use chat::ChatCommand;
pub use knowledge::KnowledgeCommand;
pub use route::RouteCommand;

use clap::ValueEnum;
use taxbot_agent::Route;

/// Route selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RouteArg {
    IncomeTax,
    RealEstateTax,
    GeneralChat,
}

impl From<RouteArg> for Route {
    fn from(arg: RouteArg) -> Self {
        match arg {
            RouteArg::IncomeTax => Route::IncomeTax,
            RouteArg::RealEstateTax => Route::RealEstateTax,
            RouteArg::GeneralChat => Route::GeneralChat,
        }
    }
}
