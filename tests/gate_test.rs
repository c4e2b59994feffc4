//! Invite and session lifecycle at the access gate.

use std::time::Duration;

use hearth_sync::error::Error;
use hearth_sync::relay::AccessGate;

#[test]
fn invite_redeems_once_then_admits_the_session() {
    let gate = AccessGate::new("secret", "admin-token", Duration::from_secs(3600));

    let code = gate.issue_invite("admin-token", "smith-family").unwrap();
    let session = gate.redeem_invite(&code, "Ada").unwrap();
    assert_eq!(session.household, "smith-family");

    let claims = gate.validate(&session.token).unwrap();
    assert_eq!(claims.name, "Ada");
    assert_eq!(claims.household, "smith-family");

    // The code was consumed.
    assert!(matches!(
        gate.redeem_invite(&code, "Eve"),
        Err(Error::InvalidInvite)
    ));
}

#[test]
fn expired_session_is_rejected_not_admitted() {
    let gate = AccessGate::new("secret", "admin-token", Duration::from_secs(1));
    let token = gate.issue_session("Ada", "smith-family").unwrap();
    assert!(gate.validate(&token).is_ok());

    std::thread::sleep(Duration::from_secs(2));
    assert!(matches!(gate.validate(&token), Err(Error::AuthRejected(_))));
}

#[test]
fn forged_token_is_rejected() {
    let issuer = AccessGate::new("their-secret", "", Duration::from_secs(3600));
    let verifier = AccessGate::new("our-secret", "", Duration::from_secs(3600));

    let token = issuer.issue_session("Mallory", "smith-family").unwrap();
    assert!(verifier.validate(&token).is_err());
}
