pub(crate) mod login;
pub(crate) mod mfa;
pub(crate) mod password;
pub(crate) mod session;
