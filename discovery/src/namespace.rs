// Copyright (c) 2024 The dep2p Authors

//! Namespace normalization.
//!
//! Callers address discovery with fully qualified namespaces like
//! `/dep2p/v2/realm/<realm>/provider/<payload>`; backends only ever see the
//! payload. Normalization is idempotent, so coordinators can safely
//! re-normalize already-normalized input.

const REALM_PREFIX: &str = "/dep2p/v2/realm/";
const SYS_PREFIX: &str = "/dep2p/v2/sys/provider/";

/// Reduce a namespace to its payload.
///
/// `/dep2p/v2/realm/<realm>/provider/<payload>` and
/// `/dep2p/v2/sys/provider/<payload>` become `<payload>`; anything else is
/// returned unchanged. Runs to a fixpoint so the operation is idempotent
/// even for pathological nested inputs.
pub fn normalize_namespace(namespace: &str) -> String {
    let mut current = namespace.to_string();
    loop {
        let next = normalize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn normalize_once(namespace: &str) -> String {
    if let Some(payload) = namespace.strip_prefix(SYS_PREFIX) {
        return payload.to_string();
    }
    if let Some(rest) = namespace.strip_prefix(REALM_PREFIX) {
        if let Some((_realm, tail)) = rest.split_once('/') {
            if let Some(payload) = tail.strip_prefix("provider/") {
                return payload.to_string();
            }
        }
    }
    namespace.to_string()
}
