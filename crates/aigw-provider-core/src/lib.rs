//! Core provider abstractions for the gateway.
//!
//! This crate intentionally does **not** depend on axum, any concrete HTTP
//! client, or the storage layer. Provider implementations build
//! `UpstreamHttpRequest`s and translate payloads; a higher layer performs IO,
//! persistence and scheduling. Everything here substitutes cleanly with test
//! doubles.

pub mod account;
pub mod adapter;
pub mod auth_data;
pub mod descriptor;
pub mod error;
pub mod headers;
pub mod manager;
pub mod registry;
pub mod token;

pub use account::{
    Account, AccountId, AccountState, BlockReason, ModelState, QuotaBackoff,
};
pub use adapter::{
    ExecuteOutcome, ExecuteRequest, HttpMethod, ProviderAdapter, RequestCtx, StreamResponse,
    StreamStart, TransportError, TransportErrorKind, UpstreamBody, UpstreamClient,
    UpstreamHttpRequest, UpstreamHttpResponse, UsageTokens,
};
pub use auth_data::{ApiKeyAuth, AuthData, AuthDataError, BearerAuth, OAuthAuth};
pub use descriptor::{AuthKind, ProviderDescriptor, WireFormat};
pub use error::{DefaultErrorParser, ErrorKind, ErrorParser, ParsedError, retry_after};
pub use headers::{Headers, header_get, header_set};
pub use manager::{
    AccountStateManager, QuotaView, RotationCounter, SelectError, UnlimitedQuota,
};
pub use registry::{AliasResolver, ModelMapping, ProviderRegistry, ResolveError, Resolution};
pub use token::{CachedToken, REFRESH_SKEW, RefreshedCredential, TokenError, TokenRefresher};
