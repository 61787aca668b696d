use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone, Utc};

/// 毫秒时间戳格式化为 UTC `%Y-%m-%d %H:%M:%S`
pub fn mill_time_to_datetime(timestamp_ms: i64) -> Result<String, String> {
    match Utc.timestamp_millis_opt(timestamp_ms) {
        LocalResult::Single(datetime) => Ok(datetime.format("%Y-%m-%d %H:%M:%S").to_string()),
        _ => Err(format!("非法时间戳: {}", timestamp_ms)),
    }
}

/// 毫秒时间戳转 UTC 时间，非法值回退到 epoch
pub fn ms_to_utc(timestamp_ms: i64) -> DateTime<Utc> {
    match Utc.timestamp_millis_opt(timestamp_ms) {
        LocalResult::Single(datetime) => datetime,
        _ => DateTime::<Utc>::default(),
    }
}

/// 某个 UTC 自然日的毫秒区间 [start, end)
pub fn day_range_ms(date: NaiveDate) -> (i64, i64) {
    let start = date
        .and_hms_opt(0, 0, 0)
        .map(|dt| Utc.from_utc_datetime(&dt).timestamp_millis())
        .unwrap_or(0);
    (start, start + Duration::days(1).num_milliseconds())
}

/// N 天前的毫秒时间戳；超出可表示范围时取边界时间
pub fn days_ago_ms(now: DateTime<Utc>, days: i64) -> i64 {
    let bound = if days > 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    };
    Duration::try_days(days)
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(bound)
        .timestamp_millis()
}
