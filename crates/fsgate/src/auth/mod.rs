//! Pluggable authentication strategies.
//!
//! Each backend type authenticates through a named [`AuthStrategy`] chosen by
//! the [`AuthStrategySelector`]. Four strategies ship with the gateway:
//!
//! | Name     | Credentials              | Tokens                                  |
//! |----------|--------------------------|-----------------------------------------|
//! | `basic`  | username / password      | base64 `user:pass`, re-verified         |
//! | `iam`    | access key / secret key  | HMAC-SHA256 signed, expiring            |
//! | `oauth2` | client id / secret       | opaque, tracked in memory, expiring     |
//! | `bearer` | token (or password)      | delegated to a [`TokenIssuer`]          |

mod basic;
mod bearer;
mod iam;
mod oauth2;
mod selector;
mod strategy;

pub use basic::BasicAuthStrategy;
pub use bearer::BearerTokenStrategy;
pub use iam::IamAuthStrategy;
pub use oauth2::OAuth2Strategy;
pub use selector::AuthStrategySelector;
pub use strategy::{
    AuthStrategy, CredentialVerifier, Credentials, StaticCredentialVerifier, TokenIssuer,
};
