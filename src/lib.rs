//! Token-based authentication with server-side login sessions.
//!
//! Access and refresh tokens are sealed with AES-256-GCM and carry a
//! `token_id` that names a row in the session store. Protected routes go
//! through [`middleware_layer::auth::require_auth`].

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;

pub mod crypto {
    pub mod aes;
    pub mod password;
    pub mod token;
}

pub mod models {
    pub mod session;
    pub mod user;
}

pub mod repositories {
    pub mod memory;
    pub mod session;
    pub mod user;
}

pub mod services {
    pub mod auth;
}

pub mod handlers {
    pub mod auth;
}

pub mod middleware_layer {
    pub mod auth;
}

pub mod validation {
    pub mod auth;
}
