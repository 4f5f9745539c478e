use crate::utils::constants::DEFAULT_RENEWAL_LEAD_TIME_SECS;

/// Source level wins over settings (global) level, then the built-in default.
pub fn get_renewal_lead_time_seconds(
    lead_time_seconds_settings: Option<u64>,
    lead_time_seconds_source: Option<u64>,
) -> u64 {
    lead_time_seconds_source
        .or(lead_time_seconds_settings)
        .unwrap_or(DEFAULT_RENEWAL_LEAD_TIME_SECS)
}
