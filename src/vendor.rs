//! OUI → manufacturer resolution.
//!
//! Backed by the IEEE registry snapshot bundled with `mac_oui`.  The table is
//! loaded lazily on first use and is read-only afterwards.

use std::sync::OnceLock;

use mac_oui::Oui;

use crate::mac::MacAddr;

pub const UNKNOWN_VENDOR: &str = "Unknown";

pub trait VendorLookup: Send + Sync {
    /// Manufacturer registered for the address prefix, if any.
    fn lookup(&self, mac: &MacAddr) -> Option<String>;

    /// Like [`lookup`](Self::lookup) but never empty.
    fn vendor_name(&self, mac: &MacAddr) -> String {
        self.lookup(mac)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_VENDOR.to_string())
    }
}

static OUI_DB: OnceLock<Option<Oui>> = OnceLock::new();

fn get_oui_db() -> Option<&'static Oui> {
    OUI_DB
        .get_or_init(|| match Oui::default() {
            Ok(db) => Some(db),
            Err(e) => {
                log::warn!("Failed to load OUI database, vendors will be reported as {UNKNOWN_VENDOR}: {e:?}");
                None
            }
        })
        .as_ref()
}

pub struct MacOuiVendors;

impl VendorLookup for MacOuiVendors {
    fn lookup(&self, mac: &MacAddr) -> Option<String> {
        // Locally administered addresses are random; they have no registered owner.
        if mac.is_locally_administered() {
            return None;
        }
        let db = get_oui_db()?;
        match db.lookup_by_mac(&mac.to_string()) {
            Ok(Some(entry)) => Some(entry.company_name.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;

    /// In-memory table keyed by OUI.
    pub struct StaticVendors(pub HashMap<[u8; 3], &'static str>);

    impl VendorLookup for StaticVendors {
        fn lookup(&self, mac: &MacAddr) -> Option<String> {
            self.0.get(&mac.oui()).map(|name| name.to_string())
        }
    }

    #[test]
    fn test_vendor_name_falls_back_to_unknown() {
        let vendors = StaticVendors(HashMap::from([([0x00, 0x11, 0x22], "Acme Radios")]));
        assert_eq!(
            vendors.vendor_name(&MacAddr([0x00, 0x11, 0x22, 9, 9, 9])),
            "Acme Radios"
        );
        assert_eq!(
            vendors.vendor_name(&MacAddr([0x00, 0x99, 0x22, 9, 9, 9])),
            UNKNOWN_VENDOR
        );
    }

    #[test]
    fn test_random_mac_is_unknown() {
        let mac = MacAddr([0xDA, 0xA1, 0x19, 0x00, 0x00, 0x01]);
        assert_eq!(MacOuiVendors.vendor_name(&mac), UNKNOWN_VENDOR);
    }
}
