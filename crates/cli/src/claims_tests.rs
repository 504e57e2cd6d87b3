// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use proptest::prelude::*;

use super::*;
use crate::test_support::{epoch_secs, make_access_token};

fn token_with_payload(payload: &[u8]) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    format!("{header}.{}.sig", URL_SAFE_NO_PAD.encode(payload))
}

#[test]
fn decode_reads_subject_and_expiry() {
    let token = make_access_token("12345", 1_900_000_000);
    let claims = decode(&token).expect("decode");
    assert_eq!(claims.subject, "12345");
    assert_eq!(claims.expires_at_secs, 1_900_000_000);
}

#[test]
fn expired_credential_still_decodes() {
    let token = make_access_token("12345", epoch_secs() - 100);
    assert!(decode(&token).is_ok());
}

#[yare::parameterized(
    two_segments  = { "abc.def" },
    four_segments = { "a.b.c.d" },
    empty         = { "" },
    not_base64    = { "head.%%%.sig" },
)]
fn malformed_shapes_rejected(token: &str) {
    assert!(decode(token).is_err());
}

#[test]
fn missing_exp_claim_rejected() {
    let token = token_with_payload(br#"{"sub":"u"}"#);
    crate::assert_err_contains!(decode(&token), "exp");
}

#[test]
fn missing_sub_claim_rejected() {
    let token = token_with_payload(br#"{"exp":123}"#);
    crate::assert_err_contains!(decode(&token), "sub");
}

#[test]
fn non_object_payload_rejected() {
    let token = token_with_payload(b"42");
    assert!(decode(&token).is_err());
}

#[test]
fn remaining_is_floor_clamped_at_zero() {
    let claims = AccessClaims { subject: "u".to_owned(), expires_at_secs: 100 };
    assert_eq!(remaining_secs(&claims, 0), 100);
    assert_eq!(remaining_secs(&claims, 98_500), 1); // 1.5s left floors to 1
    assert_eq!(remaining_secs(&claims, 100_000), 0);
    assert_eq!(remaining_secs(&claims, 150_000), 0);
}

#[test]
fn recompute_is_idempotent() {
    let claims = AccessClaims { subject: "u".to_owned(), expires_at_secs: 2_000_000_000 };
    let now_ms = 1_234_567_890_123;
    assert_eq!(remaining_secs(&claims, now_ms), remaining_secs(&claims, now_ms));
}

proptest! {
    #[test]
    fn remaining_matches_formula(
        exp in -4_000_000_000i64..4_000_000_000i64,
        now_ms in -4_000_000_000_000i64..4_000_000_000_000i64,
    ) {
        let claims = AccessClaims { subject: "u".to_owned(), expires_at_secs: exp };
        let expected = (exp as f64 - now_ms as f64 / 1000.0).floor().max(0.0) as u64;
        prop_assert_eq!(remaining_secs(&claims, now_ms), expected);
    }
}
