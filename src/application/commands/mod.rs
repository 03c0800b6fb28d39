pub mod mfa;
