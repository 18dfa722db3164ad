//! Number formatting for alert text

/// Integer part with thousands separators, e.g. `1234567.8` → `1,234,567`
pub fn format_int(value: f64) -> String {
    if !value.is_finite() {
        return "n/a".to_string();
    }

    let truncated = value.trunc();
    let digits = format!("{:.0}", truncated.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if truncated < 0.0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

/// Fraction as a percentage with two decimals, e.g. `0.0125` → `1.25%`
pub fn format_pct(fraction: f64) -> String {
    format!("{:.2}%", fraction * 100.0)
}

const WEI_PER_TOKEN: u128 = 1_000_000_000_000_000_000;

/// 18-decimal amount with four decimals, truncated, e.g. `1.2345`
pub fn format_eth(wei: u128) -> String {
    let whole = wei / WEI_PER_TOKEN;
    let frac = format!("{:018}", wei % WEI_PER_TOKEN);
    format!("{whole}.{}", &frac[..4])
}
