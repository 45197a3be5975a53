//! Global Title Translation (§4.6).

use super::address::{GlobalTitle, SccpAddress};
use crate::types::PointCode;
use std::collections::HashMap;
use std::sync::RwLock;

/// Outcome of a successful `routeGT` lookup: at least one of a point-code
/// reroute or a local SCCP hand-off, plus optional called-party rewrites.
#[derive(Debug, Clone, Default)]
pub struct GttRoute {
    pub point_code: Option<PointCode>,
    /// Name of another local SCCP instance to hand the message to,
    /// bypassing MTP entirely (§4.4 local hand-off).
    pub local_sccp: Option<String>,
    pub rewritten_global_title: Option<GlobalTitle>,
    pub rewritten_ssn: Option<u8>,
}

impl GttRoute {
    pub fn is_empty(&self) -> bool {
        self.point_code.is_none() && self.local_sccp.is_none()
    }
}

/// Pure lookup strategy consulted on the send path. No I/O on the critical
/// path (§4.6).
pub trait GlobalTitleTranslator: Send + Sync {
    /// Translate a called-party address, optionally consulting the
    /// calling-party address for policy (e.g. origin-based routing).
    /// Returns `None` when translation fails (caller reports
    /// `NoTranslationSpecificAddress`).
    fn route_gt(&self, called: &SccpAddress, calling: Option<&SccpAddress>) -> Option<GttRoute>;
}

/// Longest-prefix-match GTT over Global Title digits, the common case.
pub struct PrefixGtt {
    rules: RwLock<HashMap<String, GttRoute>>,
    default: Option<GttRoute>,
}

impl PrefixGtt {
    pub fn new() -> Self {
        Self { rules: RwLock::new(HashMap::new()), default: None }
    }

    pub fn add_rule(&self, prefix: &str, route: GttRoute) {
        self.rules.write().unwrap().insert(prefix.to_string(), route);
    }

    pub fn set_default(&mut self, route: GttRoute) {
        self.default = Some(route);
    }
}

impl Default for PrefixGtt {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalTitleTranslator for PrefixGtt {
    fn route_gt(&self, called: &SccpAddress, _calling: Option<&SccpAddress>) -> Option<GttRoute> {
        if let Some(pc) = called.point_code {
            return Some(GttRoute { point_code: Some(pc), ..Default::default() });
        }

        let gt = called.global_title.as_ref()?;
        let digits = gt.digits();
        let rules = self.rules.read().unwrap();

        let mut best: Option<(usize, &GttRoute)> = None;
        for (prefix, route) in rules.iter() {
            if digits.starts_with(prefix.as_str())
                && best.map(|(len, _)| prefix.len() > len).unwrap_or(true)
            {
                best = Some((prefix.len(), route));
            }
        }

        best.map(|(_, route)| route.clone()).or_else(|| self.default.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PointCodeType;

    #[test]
    fn longest_prefix_wins() {
        let gtt = PrefixGtt::new();
        gtt.add_rule("234", GttRoute { point_code: Some(PointCode::itu(1, 0, 1)), ..Default::default() });
        gtt.add_rule("2348", GttRoute { point_code: Some(PointCode::itu(1, 0, 2)), ..Default::default() });

        let addr = SccpAddress::from_gt(
            GlobalTitle::e164("2348012345678"),
            PointCodeType::Itu,
            Some(6),
        );
        let route = gtt.route_gt(&addr, None).unwrap();
        assert!(route.point_code.unwrap().same_type_eq(&PointCode::itu(1, 0, 2)));

        let addr2 = SccpAddress::from_gt(
            GlobalTitle::e164("2340123456789"),
            PointCodeType::Itu,
            Some(6),
        );
        let route2 = gtt.route_gt(&addr2, None).unwrap();
        assert!(route2.point_code.unwrap().same_type_eq(&PointCode::itu(1, 0, 1)));
    }

    #[test]
    fn no_match_and_no_default_fails_translation() {
        let gtt = PrefixGtt::new();
        let addr = SccpAddress::from_gt(GlobalTitle::e164("999"), PointCodeType::Itu, None);
        assert!(gtt.route_gt(&addr, None).is_none());
    }
}
