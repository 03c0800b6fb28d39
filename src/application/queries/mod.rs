pub mod mfa_status_query;
