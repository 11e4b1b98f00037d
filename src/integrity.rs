//! CRC-32 무결성 검사
//!
//! zlib `crc32()`와 동일한 CRC-32 (ISO-HDLC, 다항식 0xEDB88320).
//! 호출 간 상태를 유지하지 않음

/// 바이트 범위의 CRC-32 계산
pub fn compute(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// 여러 조각을 이어붙인 것과 같은 CRC-32 계산 (복사 없음)
pub fn compute_parts(parts: &[&[u8]]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

/// CRC 검증
pub fn verify(bytes: &[u8], expected: u32) -> bool {
    compute(bytes) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zlib_check_value() {
        // CRC-32 표준 check 값
        assert_eq!(compute(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute(&[]), 0);
    }

    #[test]
    fn test_parts_match_contiguous() {
        let whole = b"\x00\x01\x03hello radio";
        assert_eq!(
            compute_parts(&[&whole[..3], &whole[3..]]),
            compute(whole)
        );
    }

    #[test]
    fn test_verify_detects_flip() {
        let data = b"telemetry: 21.5C";
        let crc = compute(data);
        assert!(verify(data, crc));

        let mut corrupted = data.to_vec();
        corrupted[3] ^= 0x01;
        assert!(!verify(&corrupted, crc));
    }

    #[test]
    fn test_stateless_between_calls() {
        let first = compute(b"abc");
        let _ = compute(b"something else");
        assert_eq!(compute(b"abc"), first);
    }
}
