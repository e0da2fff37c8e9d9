// Exchange API client
pub mod upbit;

pub use upbit::UpbitClient;
