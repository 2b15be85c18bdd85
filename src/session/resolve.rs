//! Property-aware entity resolution.
//!
//! Peers may expose the same UUID on several characteristics, so resolution
//! cannot match on identity alone. Each lookup prefers the entry whose
//! capability flags fit the intended operation and falls back to any entry
//! with the matching UUID.

use crate::types::{CharProps, Characteristic, Descriptor, Service, Uuid, WriteMode};

/// Finds a service by UUID.
pub(crate) fn find_service(services: &[Service], uuid: Uuid) -> Option<&Service> {
    services.iter().find(|s| s.uuid == uuid)
}

fn find_with_flag(service: &Service, uuid: Uuid, flag: CharProps) -> Option<&Characteristic> {
    service
        .characteristics
        .iter()
        .find(|c| c.uuid == uuid && c.props.contains(flag))
}

fn find_any(service: &Service, uuid: Uuid) -> Option<&Characteristic> {
    service.characteristics.iter().find(|c| c.uuid == uuid)
}

/// Finds a characteristic for a read, preferring one flagged readable.
pub(crate) fn find_readable(service: &Service, uuid: Uuid) -> Option<&Characteristic> {
    find_with_flag(service, uuid, CharProps::READ).or_else(|| find_any(service, uuid))
}

/// Finds a characteristic for a write, preferring the flag matching `mode`.
pub(crate) fn find_writable(
    service: &Service,
    uuid: Uuid,
    mode: WriteMode,
) -> Option<&Characteristic> {
    let flag = match mode {
        WriteMode::WithResponse => CharProps::WRITE,
        WriteMode::WithoutResponse => CharProps::WRITE_WITHOUT_RESPONSE,
    };
    find_with_flag(service, uuid, flag).or_else(|| find_any(service, uuid))
}

/// Finds a characteristic for notification setup.
///
/// Prefers plain notifications over acknowledged indications; the returned
/// flag is true when indications must be used instead.
pub(crate) fn find_notifiable(service: &Service, uuid: Uuid) -> Option<(&Characteristic, bool)> {
    if let Some(c) = find_with_flag(service, uuid, CharProps::NOTIFY) {
        return Some((c, false));
    }
    if let Some(c) = find_with_flag(service, uuid, CharProps::INDICATE) {
        return Some((c, true));
    }
    find_any(service, uuid).map(|c| (c, false))
}

/// Finds a descriptor under any characteristic with the given UUID.
pub(crate) fn find_descriptor(
    service: &Service,
    characteristic: Uuid,
    descriptor: Uuid,
) -> Option<(&Characteristic, &Descriptor)> {
    service
        .characteristics
        .iter()
        .filter(|c| c.uuid == characteristic)
        .find_map(|c| {
            c.descriptors
                .iter()
                .find(|d| d.uuid == descriptor)
                .map(|d| (c, d))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SVC: Uuid = Uuid::from_u128(0x1000);
    const CHAR: Uuid = Uuid::from_u128(0x2000);
    const DESC: Uuid = Uuid::from_u128(0x2902);

    fn characteristic(instance: u16, props: CharProps) -> Characteristic {
        Characteristic {
            uuid: CHAR,
            instance,
            props,
            descriptors: vec![Descriptor { uuid: DESC }],
        }
    }

    fn service(characteristics: Vec<Characteristic>) -> Service {
        Service {
            uuid: SVC,
            characteristics,
        }
    }

    #[test]
    fn test_read_prefers_readable_duplicate() {
        let svc = service(vec![
            characteristic(1, CharProps::WRITE),
            characteristic(2, CharProps::READ),
        ]);
        let found = find_readable(&svc, CHAR).unwrap();
        assert_eq!(found.instance, 2);
    }

    #[test]
    fn test_read_falls_back_to_any_match() {
        let svc = service(vec![characteristic(7, CharProps::WRITE)]);
        let found = find_readable(&svc, CHAR).unwrap();
        assert_eq!(found.instance, 7);
    }

    #[test]
    fn test_write_mode_selects_flag() {
        let svc = service(vec![
            characteristic(1, CharProps::WRITE),
            characteristic(2, CharProps::WRITE_WITHOUT_RESPONSE),
        ]);
        assert_eq!(
            find_writable(&svc, CHAR, WriteMode::WithResponse).unwrap().instance,
            1
        );
        assert_eq!(
            find_writable(&svc, CHAR, WriteMode::WithoutResponse)
                .unwrap()
                .instance,
            2
        );
    }

    #[test]
    fn test_notify_prefers_notify_over_indicate() {
        let svc = service(vec![
            characteristic(1, CharProps::INDICATE),
            characteristic(2, CharProps::NOTIFY),
        ]);
        let (found, indication) = find_notifiable(&svc, CHAR).unwrap();
        assert_eq!(found.instance, 2);
        assert!(!indication);
    }

    #[test]
    fn test_notify_uses_indication_when_only_option() {
        let svc = service(vec![characteristic(1, CharProps::INDICATE)]);
        let (found, indication) = find_notifiable(&svc, CHAR).unwrap();
        assert_eq!(found.instance, 1);
        assert!(indication);
    }

    #[test]
    fn test_unknown_uuid_not_found() {
        let svc = service(vec![characteristic(1, CharProps::READ)]);
        assert!(find_readable(&svc, Uuid::from_u128(0xdead)).is_none());
        assert!(find_service(&[svc], Uuid::from_u128(0xdead)).is_none());
    }

    #[test]
    fn test_descriptor_lookup() {
        let svc = service(vec![characteristic(1, CharProps::READ)]);
        let (c, d) = find_descriptor(&svc, CHAR, DESC).unwrap();
        assert_eq!(c.instance, 1);
        assert_eq!(d.uuid, DESC);
        assert!(find_descriptor(&svc, CHAR, Uuid::from_u128(0xbeef)).is_none());
    }
}
