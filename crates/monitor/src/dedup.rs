//! Privilege-change de-duplication (spec §4.9 step 4): remembers the last
//! `(hasRoot, hasAssist)` pair processed so repeated notifications of the
//! same snapshot are ignored, unless the caller forces a re-check (used
//! when the UI becomes foregrounded).

use netshield_model::Privileges;

#[derive(Debug, Default)]
pub struct PrivilegeChangeDedup {
    last: Option<(bool, bool)>,
}

impl PrivilegeChangeDedup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_process(&mut self, privileges: Privileges, force_check: bool) -> bool {
        let key = (privileges.has_root, privileges.has_assist);
        if force_check || self.last != Some(key) {
            self.last = Some(key);
            true
        } else {
            false
        }
    }
}
