pub mod eodhd;
pub mod loader;
pub mod prices;
pub mod types;

pub use eodhd::{fridays, load_chain_dir, save_chain, ticker_of, ChainResponse, EodhdClient, EodhdError};
pub use loader::{DataLoader, LoaderError};
pub use prices::{PriceBar, PriceHistory};
pub use types::{
    market_close, ContractId, Greeks, OptionQuote, OptionType, OptionsChain, OptionsSnapshot,
    ParseOptionTypeError,
};
