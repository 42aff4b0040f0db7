use chrono::{DateTime, Utc};
use rocpp_core::v16::{
    messages::clear_charging_profile::ClearChargingProfileRequest,
    types::{
        ChargingProfile, ChargingProfileKindType, ChargingProfilePurposeType,
        ChargingProfileStatus, ChargingRateUnitType, ClearChargingProfileStatus,
    },
};

/// Below this the EV cannot be offered current at all.
pub const MIN_OFFERED_CURRENT: f32 = 6.0;
/// Hardware ceiling of the device under test.
pub const MAX_OFFERED_CURRENT: f32 = 32.0;
/// Largest limit the device accepts in a schedule period.
pub const MAX_REPRESENTABLE_LIMIT: f32 = 80.0;

/// Current the device is expected to offer for a per-period limit.
pub fn expected_offered_current(limit: f32) -> f32 {
    if limit < MIN_OFFERED_CURRENT {
        0.0
    } else {
        limit.min(MAX_OFFERED_CURRENT)
    }
}

/// A limit this low suspends charging from the station side.
pub fn suspends_charging(limit: f32) -> bool {
    limit < MIN_OFFERED_CURRENT
}

pub fn is_representable(limit: f32) -> bool {
    (0.0..=MAX_REPRESENTABLE_LIMIT).contains(&limit)
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstalledProfile {
    pub connector_id: i32,
    pub profile: ChargingProfile,
}

/// Charging profiles the harness installed on the device, keyed by
/// (transaction, stack level) within each purpose.
#[derive(Debug, Clone, Default)]
pub struct ChargingProfiles {
    installed: Vec<InstalledProfile>,
}

impl ChargingProfiles {
    pub fn installed(&self) -> &[InstalledProfile] {
        &self.installed
    }

    /// Records a profile the way the device is required to treat it. A
    /// TxProfile needs an active transaction on that connector.
    pub fn install(
        &mut self,
        connector_id: i32,
        profile: ChargingProfile,
        active_transaction: Option<i32>,
    ) -> ChargingProfileStatus {
        if profile.charging_profile_purpose == ChargingProfilePurposeType::TxProfile {
            match active_transaction {
                Some(tx) if profile.transaction_id.is_none_or(|id| id == tx) => {}
                _ => return ChargingProfileStatus::Rejected,
            }
        }
        if profile
            .charging_schedule
            .charging_schedule_period
            .iter()
            .any(|p| !is_representable(p.limit))
        {
            return ChargingProfileStatus::Rejected;
        }
        self.installed.retain(|p| {
            p.profile.charging_profile_id != profile.charging_profile_id
                && !(p.connector_id == connector_id
                    && p.profile.charging_profile_purpose == profile.charging_profile_purpose
                    && p.profile.stack_level == profile.stack_level
                    && p.profile.transaction_id == profile.transaction_id)
        });
        self.installed.push(InstalledProfile {
            connector_id,
            profile,
        });
        ChargingProfileStatus::Accepted
    }

    pub fn clear(&mut self, req: &ClearChargingProfileRequest) -> ClearChargingProfileStatus {
        let before = self.installed.len();
        self.installed.retain(|p| {
            let matches = req.id.is_none_or(|id| id == p.profile.charging_profile_id)
                && req.connector_id.is_none_or(|c| c == p.connector_id)
                && req
                    .charging_profile_purpose
                    .is_none_or(|purpose| purpose == p.profile.charging_profile_purpose)
                && req.stack_level.is_none_or(|l| l == p.profile.stack_level);
            !matches
        });
        if self.installed.len() == before {
            ClearChargingProfileStatus::Unknown
        } else {
            ClearChargingProfileStatus::Accepted
        }
    }

    /// TxProfiles end with their transaction.
    pub fn end_transaction(&mut self, transaction_id: i32) {
        self.installed.retain(|p| {
            !(p.profile.charging_profile_purpose == ChargingProfilePurposeType::TxProfile
                && p.profile.transaction_id.is_none_or(|id| id == transaction_id))
        });
    }

    /// Effective current limit on `connector_id` at `now`: TxProfile over
    /// TxDefaultProfile, highest stack level within a purpose, capped by
    /// ChargePointMaxProfile.
    pub fn effective_limit(
        &self,
        connector_id: i32,
        transaction_id: Option<i32>,
        now: DateTime<Utc>,
    ) -> Option<f32> {
        let tx = self
            .purpose_limit(ChargingProfilePurposeType::TxProfile, connector_id, transaction_id, now)
            .or_else(|| {
                self.purpose_limit(
                    ChargingProfilePurposeType::TxDefaultProfile,
                    connector_id,
                    transaction_id,
                    now,
                )
            });
        let max = self.purpose_limit(
            ChargingProfilePurposeType::ChargePointMaxProfile,
            0,
            transaction_id,
            now,
        );
        match (tx, max) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn purpose_limit(
        &self,
        purpose: ChargingProfilePurposeType,
        connector_id: i32,
        transaction_id: Option<i32>,
        now: DateTime<Utc>,
    ) -> Option<f32> {
        self.installed
            .iter()
            .filter(|p| p.profile.charging_profile_purpose == purpose)
            .filter(|p| p.connector_id == connector_id || p.connector_id == 0)
            .filter(|p| match purpose {
                ChargingProfilePurposeType::TxProfile => match (p.profile.transaction_id, transaction_id) {
                    (Some(a), Some(b)) => a == b,
                    (None, Some(_)) => true,
                    _ => false,
                },
                _ => true,
            })
            .filter_map(|p| active_period_limit(&p.profile, now).map(|l| (p.profile.stack_level, l)))
            .max_by_key(|(level, _)| *level)
            .map(|(_, limit)| limit)
    }
}

/// Limit of the schedule period in force at `now`, if the profile is active.
pub fn active_period_limit(profile: &ChargingProfile, now: DateTime<Utc>) -> Option<f32> {
    let schedule = &profile.charging_schedule;
    if schedule.charging_rate_unit != ChargingRateUnitType::A {
        return None;
    }
    if profile.valid_from.is_some_and(|from| now < from) || profile.valid_to.is_some_and(|to| now > to) {
        return None;
    }
    let elapsed = match (profile.charging_profile_kind, schedule.start_schedule) {
        (ChargingProfileKindType::Relative, _) | (_, None) => 0,
        (_, Some(start)) => (now - start).num_seconds(),
    };
    if elapsed < 0 || schedule.duration.is_some_and(|d| elapsed > i64::from(d)) {
        return None;
    }
    schedule
        .charging_schedule_period
        .iter()
        .filter(|p| i64::from(p.start_period) <= elapsed)
        .max_by_key(|p| p.start_period)
        .map(|p| p.limit)
}
