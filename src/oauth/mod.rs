pub mod callback;
pub mod flow;
pub mod pkce;
pub mod session;
pub mod token;

pub use callback::listen_for_callback;
pub use flow::{connect, credential_from_token, finish_authorization};
pub use pkce::{
    begin_authorization, challenge_for, complete_authorization, generate_pkce, AuthCode,
    AuthorizationSession, CallbackParams, PkceChallenge,
};
pub use session::PendingAuthorizations;
pub use token::{TokenExchangeClient, TokenResult};
