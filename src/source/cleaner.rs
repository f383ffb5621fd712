use crate::models::DailyBar;
use chrono::NaiveDate;
use tracing::warn;

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parse a formatted number: strip thousands separators and whitespace.
/// "59,700" → 59700.0 | "-0.50" → -0.5 | "" / "-" → None
pub fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s == "N/A" || s == "-" || s == "—" {
        return None;
    }
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a non-negative integer count ("17,142,847" → 17142847).
pub fn parse_count(s: &str) -> Option<u64> {
    let v = parse_number(s)?;
    if v < 0.0 {
        return None;
    }
    Some(v.round() as u64)
}

/// Parse dates: compact `20240102` (KRX / Naver) or ISO `2024-01-02`.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();

    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y%m%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y/%m/%d") {
        return Some(d);
    }

    None
}

/// Exchange tickers are six characters wide; numeric codes lose their leading
/// zeros when they pass through spreadsheets, so pad them back.
/// "5930" → "005930" | "0126Z0" → "0126Z0"
pub fn normalise_code(s: &str) -> String {
    format!("{:0>6}", s.trim().to_uppercase())
}

// ── Daily bar sanitising ──────────────────────────────────────────────────────

/// Drop bars with a non-positive close; halted sessions report 0 for
/// open/high/low, which are back-filled with the close.
pub fn sanitise_bar(code: &str, mut bar: DailyBar) -> Option<DailyBar> {
    if !(bar.close > 0.0) {
        warn!("Invalid close {} for {} on {}", bar.close, code, bar.date);
        return None;
    }

    for v in [&mut bar.open, &mut bar.high, &mut bar.low] {
        if !(*v > 0.0) {
            *v = bar.close;
        }
    }
    bar.high = bar.high.max(bar.open).max(bar.close);
    bar.low = bar.low.min(bar.open).min(bar.close);

    Some(bar)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
