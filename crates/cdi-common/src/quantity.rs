//! 资源数量模块
//!
//! 解析 Kubernetes `Quantity` 字符串（如 `10Gi`、`1500M`、`1e3`），
//! 以整数字节为单位进行比较与计算。小数部分向上取整。

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::consts::DEFAULT_ALIGN_BLOCK_SIZE;
use crate::error::{Error, Result};

/// 将 Quantity 解析为整数值
pub fn parse_quantity(q: &Quantity) -> Result<i64> {
    parse_quantity_str(&q.0)
}

/// 将数量字符串解析为整数值
pub fn parse_quantity_str(input: &str) -> Result<i64> {
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid(input));
    }

    let (negative, body) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    let number_end = body
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(body.len());
    let (number, suffix) = body.split_at(number_end);
    if number.is_empty() || number == "." {
        return Err(invalid(input));
    }

    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, f),
        None => (number, ""),
    };
    if frac_part.contains('.') {
        return Err(invalid(input));
    }

    let digits = format!("{int_part}{frac_part}");
    let mantissa: i128 = if digits.is_empty() {
        0
    } else {
        digits.parse().map_err(|_| invalid(input))?
    };
    let scale = pow10(frac_part.len() as u32).ok_or_else(|| invalid(input))?;

    let (mul, div) = suffix_ratio(suffix).ok_or_else(|| invalid(input))?;

    let numerator = mantissa.checked_mul(mul).ok_or_else(|| overflow(input))?;
    let denominator = scale.checked_mul(div).ok_or_else(|| overflow(input))?;
    // 向上取整
    let value = (numerator + denominator - 1) / denominator;

    let value = i64::try_from(value).map_err(|_| overflow(input))?;
    Ok(if negative { -value } else { value })
}

/// 由字节数构造 Quantity
pub fn quantity_from_bytes(bytes: i64) -> Quantity {
    Quantity(bytes.to_string())
}

/// 两个 Quantity 是否表示相同的值
pub fn quantity_eq(a: &Quantity, b: &Quantity) -> bool {
    match (parse_quantity(a), parse_quantity(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => a.0 == b.0,
    }
}

/// 向上对齐到 `align` 的整数倍
pub fn round_up(size: i64, align: i64) -> i64 {
    if align <= 0 {
        return size;
    }
    let rem = size % align;
    if rem == 0 {
        size
    } else {
        size + (align - rem)
    }
}

/// 计算写入 `size` 字节数据所需的卷大小（包含文件系统开销）
pub fn required_space(overhead: f64, size: i64) -> i64 {
    let aligned = round_up(size, DEFAULT_ALIGN_BLOCK_SIZE);
    if !(0.0..1.0).contains(&overhead) {
        return aligned;
    }
    (aligned as f64 / (1.0 - overhead)).ceil() as i64
}

/// 解析文件系统开销比例（如 `"0.055"`）
pub fn parse_overhead(value: &str) -> Result<f64> {
    let overhead: f64 = value
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("invalid filesystem overhead {value:?}")))?;
    if !(0.0..1.0).contains(&overhead) {
        return Err(Error::config(format!(
            "filesystem overhead {value:?} must be in [0, 1)"
        )));
    }
    Ok(overhead)
}

fn suffix_ratio(suffix: &str) -> Option<(i128, i128)> {
    let ratio = match suffix {
        "" => (1, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        "n" => (1, 1_000_000_000),
        "u" => (1, 1_000_000),
        "m" => (1, 1_000),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        exp if exp.starts_with('e') || exp.starts_with('E') => {
            let n: i32 = exp[1..].parse().ok()?;
            if n >= 0 {
                (pow10(n as u32)?, 1)
            } else {
                (1, pow10(n.unsigned_abs())?)
            }
        }
        _ => return None,
    };
    Some(ratio)
}

fn pow10(exp: u32) -> Option<i128> {
    10i128.checked_pow(exp)
}

fn invalid(input: &str) -> Error {
    Error::validation(format!("invalid quantity {input:?}"))
}

fn overflow(input: &str) -> Error {
    Error::validation(format!("quantity {input:?} out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("10Gi", 10 * 1024 * 1024 * 1024)]
    #[case("1500M", 1_500_000_000)]
    #[case("1.5Gi", 1024 * 1024 * 1024 * 3 / 2)]
    #[case("1e3", 1000)]
    #[case("0", 0)]
    #[case("100m", 1)]
    #[case("128974848", 128_974_848)]
    #[case("  5Ki ", 5 * 1024)]
    fn test_parse_quantity(#[case] input: &str, #[case] expected: i64) {
        assert_eq!(parse_quantity_str(input).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("Gi")]
    #[case("10Xi")]
    #[case("1.2.3")]
    fn test_parse_quantity_rejects_garbage(#[case] input: &str) {
        assert!(parse_quantity_str(input).is_err());
    }

    #[test]
    fn test_quantity_eq_across_units() {
        assert!(quantity_eq(&Quantity("1Gi".into()), &Quantity("1073741824".into())));
        assert!(!quantity_eq(&Quantity("1Gi".into()), &Quantity("1G".into())));
    }

    #[test]
    fn test_required_space_aligns_then_inflates() {
        let mib = DEFAULT_ALIGN_BLOCK_SIZE;
        assert_eq!(required_space(0.0, mib + 1), 2 * mib);
        assert_eq!(required_space(0.5, 10 * mib), 20 * mib);
        let inflated = required_space(0.055, 1024 * mib);
        assert!(inflated > 1024 * mib);
        assert_eq!(inflated, ((1024 * mib) as f64 / 0.945).ceil() as i64);
    }

    #[test]
    fn test_parse_overhead() {
        assert!((parse_overhead("0.055").unwrap() - 0.055).abs() < f64::EPSILON);
        assert!(parse_overhead("1").is_err());
        assert!(parse_overhead("abc").is_err());
    }
}
