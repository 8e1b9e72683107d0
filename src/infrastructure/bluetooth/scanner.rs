//! Scan Session Module
//!
//! Bookkeeping for one round of helmet discovery: an insertion-ordered,
//! duplicate-free set of everything the radio has reported, plus the
//! name-prefix filter that decides what gets surfaced. The filter runs
//! here, over the full set, rather than being pushed down to the radio.

use crate::domain::models::DiscoveredDevice;

pub struct ScanSession {
    devices: Vec<DiscoveredDevice>,
    name_prefix: Option<String>,
}

impl ScanSession {
    /// Start an empty session. `name_prefix` is matched case-sensitively;
    /// `None` surfaces every device.
    pub fn new(name_prefix: Option<String>) -> Self {
        Self {
            devices: Vec::new(),
            name_prefix,
        }
    }

    /// Record an advertisement. Returns true on the first sighting of a
    /// device identity; repeats are dropped.
    pub fn observe(&mut self, device: DiscoveredDevice) -> bool {
        if self.devices.iter().any(|seen| seen.same_identity(&device)) {
            return false;
        }
        self.devices.push(device);
        true
    }

    pub fn filter_matches(&self, device: &DiscoveredDevice) -> bool {
        match &self.name_prefix {
            Some(prefix) => device.name.starts_with(prefix.as_str()),
            None => true,
        }
    }

    /// Everything seen this session, in discovery order.
    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    /// The filtered view a picker would show.
    pub fn matching(&self) -> impl Iterator<Item = &DiscoveredDevice> + '_ {
        self.devices
            .iter()
            .filter(|device| self.filter_matches(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, address: &str, rssi: i16) -> DiscoveredDevice {
        DiscoveredDevice {
            name: name.to_string(),
            service_uuids: Vec::new(),
            address: address.to_string(),
            rssi: Some(rssi),
        }
    }

    #[test]
    fn deduplicates_by_identity() {
        let mut scan = ScanSession::new(None);
        assert!(scan.observe(device("HEADWARE-01", "AA", -50)));
        // same helmet, different signal strength
        assert!(!scan.observe(device("HEADWARE-01", "AA", -70)));
        assert!(scan.observe(device("HEADWARE-01", "BB", -50)));
        assert_eq!(scan.devices().len(), 2);

        // no two entries share a (name, address) pair
        for (i, a) in scan.devices().iter().enumerate() {
            for b in &scan.devices()[i + 1..] {
                assert!(!(a.name == b.name && a.address == b.address));
            }
        }
    }

    #[test]
    fn keeps_discovery_order() {
        let mut scan = ScanSession::new(None);
        scan.observe(device("HEADWARE-02", "BB", -60));
        scan.observe(device("HEADWARE-01", "AA", -50));
        scan.observe(device("HEADWARE-02", "BB", -40));
        let names: Vec<&str> = scan.devices().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["HEADWARE-02", "HEADWARE-01"]);
    }

    #[test]
    fn prefix_filter_is_case_sensitive() {
        let mut scan = ScanSession::new(Some("HEADWARE".to_string()));
        scan.observe(device("HEADWARE-01", "AA", -50));
        scan.observe(device("OTHER-02", "BB", -50));
        scan.observe(device("headware-03", "CC", -50));

        let matching: Vec<&str> = scan.matching().map(|d| d.address.as_str()).collect();
        assert_eq!(matching, ["AA"]);
        // the full set is still there underneath the filter
        assert_eq!(scan.devices().len(), 3);
    }

    #[test]
    fn no_prefix_surfaces_everything() {
        let mut scan = ScanSession::new(None);
        scan.observe(device("HEADWARE-01", "AA", -50));
        scan.observe(device("OTHER-02", "BB", -50));
        assert_eq!(scan.matching().count(), 2);
    }
}
