//! Activation service: stored-key acceptance, user-key exchange and retry.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use outpost_agent::application::services::activation::{Activation, TrustAnchors};
use outpost_agent::domain::{ActivationError, HostInfo};
use outpost_common::signature::generate_signing_key;
use outpost_common::{ActivationClaims, SealKey, UserKey, split_activation_header};

use crate::mocks::{FakeIssuer, Fleet, HOST_MAC, MemoryKeys, host};

fn anchors(fleet: &Fleet) -> TrustAnchors {
    TrustAnchors {
        bootstrap: fleet.bootstrap.clone(),
        trust: fleet.trust.verifying_key(),
    }
}

fn service(fleet: &Fleet, keys: &MemoryKeys, issuer: &FakeIssuer) -> Activation<MemoryKeys, FakeIssuer> {
    Activation::new(keys.clone(), issuer.clone(), anchors(fleet), host())
}

fn store_ak(keys: &MemoryKeys, blob: String) {
    *keys.activation.lock().unwrap() = Some(blob);
}

fn store_user(keys: &MemoryKeys, blob: String) {
    *keys.user.lock().unwrap() = Some(blob);
}

// ── Stored activation key ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_ensure_valid_stored_key_makes_no_network_call() {
    let fleet = Fleet::new();
    let (keys, issuer) = (MemoryKeys::default(), FakeIssuer::default());
    store_ak(&keys, fleet.ak_blob(fleet.ak_info(HOST_MAC, TimeDelta::days(30))));

    let activated = service(&fleet, &keys, &issuer).ensure().await.unwrap();

    assert_eq!(activated.info.host_uuid, "6f1c2d9e-host");
    assert_eq!(activated.verify_key, fleet.responses.verifying_key());
    assert_eq!(issuer.calls(), 0);
}

#[tokio::test]
async fn test_ensure_expired_key_is_fatal_without_network() {
    let fleet = Fleet::new();
    let (keys, issuer) = (MemoryKeys::default(), FakeIssuer::default());
    store_ak(&keys, fleet.ak_blob(fleet.ak_info(HOST_MAC, TimeDelta::seconds(-5))));
    store_user(&keys, fleet.user_blob(None));

    let err = service(&fleet, &keys, &issuer).ensure().await.unwrap_err();

    assert!(matches!(err, ActivationError::Expired(_)), "{err}");
    assert_eq!(issuer.calls(), 0);
}

#[tokio::test]
async fn test_ensure_key_for_other_host_is_fatal() {
    let fleet = Fleet::new();
    let (keys, issuer) = (MemoryKeys::default(), FakeIssuer::default());
    store_ak(&keys, fleet.ak_blob(fleet.ak_info("de:ad:be:ef:00:00", TimeDelta::days(1))));

    let err = service(&fleet, &keys, &issuer).ensure().await.unwrap_err();

    assert!(matches!(err, ActivationError::ForeignHost { .. }), "{err}");
    assert_eq!(issuer.calls(), 0);
}

#[test]
fn test_load_rejects_key_signed_by_unknown_authority() {
    let fleet = Fleet::new();
    let rogue = Fleet {
        bootstrap: fleet.bootstrap.clone(),
        trust: generate_signing_key(),
        responses: generate_signing_key(),
    };
    let keys = MemoryKeys::default();
    store_ak(&keys, rogue.ak_blob(rogue.ak_info(HOST_MAC, TimeDelta::days(1))));

    let err = service(&fleet, &keys, &FakeIssuer::default())
        .load(Utc::now())
        .unwrap_err();
    assert!(matches!(err, ActivationError::Untrusted(_)), "{err}");
}

#[test]
fn test_load_rejects_key_sealed_for_another_fleet() {
    let fleet = Fleet::new();
    let other = Fleet::new();
    let keys = MemoryKeys::default();
    store_ak(&keys, other.ak_blob(other.ak_info(HOST_MAC, TimeDelta::days(1))));

    let err = service(&fleet, &keys, &FakeIssuer::default())
        .load(Utc::now())
        .unwrap_err();
    assert!(matches!(err, ActivationError::Unreadable(_)), "{err}");
}

#[test]
fn test_load_without_key_is_none() {
    let fleet = Fleet::new();
    let loaded = service(&fleet, &MemoryKeys::default(), &FakeIssuer::default())
        .load(Utc::now())
        .unwrap();
    assert!(loaded.is_none());
}

#[test]
fn test_load_hardware_binding() {
    let fleet = Fleet::new();
    let keys = MemoryKeys::default();
    store_ak(&keys, fleet.ak_blob(fleet.ak_info("hw-edge-1", TimeDelta::days(1))));
    let issuer = FakeIssuer::default();

    assert!(service(&fleet, &keys, &issuer).load(Utc::now()).is_err());
    let loaded = service(&fleet, &keys, &issuer)
        .with_hardware_id(true)
        .load(Utc::now())
        .unwrap();
    assert!(loaded.is_some());
}

#[test]
fn test_load_key_bound_to_empty_id_is_rejected_on_unreadable_host() {
    let fleet = Fleet::new();
    let keys = MemoryKeys::default();
    store_ak(&keys, fleet.ak_blob(fleet.ak_info("", TimeDelta::days(1))));
    let unreadable = HostInfo {
        hardware_id: String::new(),
        ..host()
    };

    let err = Activation::new(keys, FakeIssuer::default(), anchors(&fleet), unreadable)
        .with_hardware_id(true)
        .load(Utc::now())
        .unwrap_err();

    assert!(matches!(err, ActivationError::NoDeviceId(_)), "{err}");
}

#[tokio::test]
async fn test_ensure_without_hardware_id_fails_before_network() {
    let fleet = Fleet::new();
    let (keys, issuer) = (MemoryKeys::default(), FakeIssuer::default());
    store_user(&keys, fleet.user_blob(None));
    let unreadable = HostInfo {
        hardware_id: String::new(),
        ..host()
    };

    let err = Activation::new(keys, issuer.clone(), anchors(&fleet), unreadable)
        .with_hardware_id(true)
        .ensure()
        .await
        .unwrap_err();

    assert!(matches!(err, ActivationError::NoDeviceId(_)), "{err}");
    assert_eq!(issuer.calls(), 0);
}

// ── User key exchange ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_ensure_without_any_key_is_missing() {
    let fleet = Fleet::new();
    let issuer = FakeIssuer::default();

    let err = service(&fleet, &MemoryKeys::default(), &issuer)
        .ensure()
        .await
        .unwrap_err();

    assert!(matches!(err, ActivationError::Missing(_)), "{err}");
    assert_eq!(issuer.calls(), 0);
}

#[tokio::test]
async fn test_ensure_expired_user_key_is_fatal() {
    let fleet = Fleet::new();
    let (keys, issuer) = (MemoryKeys::default(), FakeIssuer::default());
    store_user(&keys, fleet.user_blob(Some(TimeDelta::hours(-1))));

    let err = service(&fleet, &keys, &issuer).ensure().await.unwrap_err();

    assert!(matches!(err, ActivationError::UserKeyExpired(_)), "{err}");
    assert_eq!(issuer.calls(), 0);
}

#[test]
fn test_user_key_sealed_with_wrong_bootstrap_is_rejected() {
    let fleet = Fleet::new();
    let keys = MemoryKeys::default();
    store_user(&keys, Fleet::new().user_blob(None));

    let err = service(&fleet, &keys, &FakeIssuer::default())
        .user_key(Utc::now())
        .unwrap_err();
    assert!(matches!(err, ActivationError::UserKey(_)), "{err}");
}

#[tokio::test(start_paused = true)]
async fn test_ensure_retries_issuer_then_saves_key() {
    let fleet = Fleet::new();
    let (keys, issuer) = (MemoryKeys::default(), FakeIssuer::default());
    let user_blob = fleet.user_blob(Some(TimeDelta::days(1)));
    store_user(&keys, user_blob.clone());
    let ak = fleet.ak_blob(fleet.ak_info(HOST_MAC, TimeDelta::days(30)));
    issuer.fail();
    issuer.fail();
    issuer.answer(&ak);

    let started = tokio::time::Instant::now();
    let activated = service(&fleet, &keys, &issuer).ensure().await.unwrap();

    assert_eq!(issuer.calls(), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(15 + 60));
    assert_eq!(activated.info.mac_address, HOST_MAC);
    assert_eq!(keys.activation.lock().unwrap().as_deref(), Some(ak.as_str()));

    // The bearer carries this host's identity sealed with the user secret.
    let secret: SealKey = UserKey::open(&user_blob, &fleet.bootstrap)
        .unwrap()
        .secret()
        .unwrap();
    let bearer = issuer.bearers.lock().unwrap()[0].clone();
    let (username, blob) = split_activation_header(&bearer).unwrap();
    assert_eq!(username, "ops");
    let claims = ActivationClaims::open(blob, &secret).unwrap();
    assert_eq!(claims.device_id, HOST_MAC);
    assert_eq!(claims.hostname, "edge-1");
}

#[tokio::test]
async fn test_ensure_rejects_issued_key_that_fails_verification() {
    let fleet = Fleet::new();
    let rogue = Fleet {
        bootstrap: fleet.bootstrap.clone(),
        trust: generate_signing_key(),
        responses: generate_signing_key(),
    };
    let (keys, issuer) = (MemoryKeys::default(), FakeIssuer::default());
    store_user(&keys, fleet.user_blob(None));
    issuer.answer(&rogue.ak_blob(rogue.ak_info(HOST_MAC, TimeDelta::days(1))));

    let err = service(&fleet, &keys, &issuer).ensure().await.unwrap_err();

    assert!(matches!(err, ActivationError::Untrusted(_)), "{err}");
    assert_eq!(issuer.calls(), 1);
}
