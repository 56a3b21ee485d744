mod http;
pub mod models;

pub use self::http::{
    JsonRpcProvider, JsonRpcProviderError, JsonRpcProviderErrorExt, JsonRpcProviderOptions,
};
