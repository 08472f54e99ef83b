mod admin;
mod request_id;

pub use admin::{ADMIN_ROLE, AdminIdentity, AuthError, admin_auth_middleware, authenticate};
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
