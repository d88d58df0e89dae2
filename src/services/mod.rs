//! Services layer - Business logic
//!
//! - `token`: session token issue/verify/revoke
//! - `rate_limiter`: the admission gate in front of sensitive routes
//! - `booking`: the booking state machine and its side effects
//! - `notifications`: real-time rooms for restaurant dashboards
//! - `account`: OTP signup, login and logout
//! - `email` / `payment`: adapters for the external collaborators

pub mod account;
pub mod booking;
pub mod email;
pub mod notifications;
pub mod password;
pub mod payment;
pub mod rate_limiter;
pub mod token;

pub use account::{AccountError, AccountService, LoginInput, SendOtpInput, SignupInput};
pub use booking::{BookingLedger, LedgerError, OwnerDecision};
pub use email::{create_email_notifier, EmailNotifier, EmailTemplate};
pub use notifications::{ClientEvent, ConnectionId, RoomRegistry, ServerEvent};
pub use password::{hash_password, verify_password};
pub use payment::{create_payment_issuer, PaymentLinkError, PaymentLinkIssuer};
pub use rate_limiter::{Admission, AdmissionGate};
pub use token::{AuthError, IssuedToken, TokenAuthority};
