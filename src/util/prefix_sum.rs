//! Kogge-Stone prefix sums for turning delta-decoded doc ids back into
//! absolute ids. Eight lanes per AVX2 pass; sixteen runs as two chained
//! passes; every other length takes the scalar loop.

#[cfg(target_arch = "x86_64")]
use once_cell::sync::Lazy;

#[cfg(target_arch = "x86_64")]
static HAS_AVX2: Lazy<bool> = Lazy::new(|| is_x86_feature_detected!("avx2"));

pub fn prefix_sum_scalar(deltas: &mut [i32], base: i32) {
    let mut cumsum = base;
    for d in deltas.iter_mut() {
        cumsum += *d;
        *d = cumsum;
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn prefix_sum8_avx2(deltas: *mut i32, base: i32) {
    use std::arch::x86_64::*;

    let mut result = _mm256_loadu_si256(deltas as *const __m256i);
    let zero = _mm256_setzero_si256();

    // Rotate right by one lane, zero the wrapped lane, accumulate.
    let rot1 = _mm256_setr_epi32(7, 0, 1, 2, 3, 4, 5, 6);
    let mut shifted = _mm256_permutevar8x32_epi32(result, rot1);
    shifted = _mm256_blend_epi32::<0x01>(shifted, zero);
    result = _mm256_add_epi32(result, shifted);

    let rot2 = _mm256_setr_epi32(6, 7, 0, 1, 2, 3, 4, 5);
    shifted = _mm256_permutevar8x32_epi32(result, rot2);
    shifted = _mm256_blend_epi32::<0x03>(shifted, zero);
    result = _mm256_add_epi32(result, shifted);

    let rot4 = _mm256_setr_epi32(4, 5, 6, 7, 0, 1, 2, 3);
    shifted = _mm256_permutevar8x32_epi32(result, rot4);
    shifted = _mm256_blend_epi32::<0x0f>(shifted, zero);
    result = _mm256_add_epi32(result, shifted);

    result = _mm256_add_epi32(result, _mm256_set1_epi32(base));
    _mm256_storeu_si256(deltas as *mut __m256i, result);
}

/// In-place deltas -> absolute values, seeded with `base` (the last
/// absolute doc id before this run).
pub fn prefix_sum(deltas: &mut [i32], base: i32) {
    #[cfg(target_arch = "x86_64")]
    {
        if *HAS_AVX2 {
            match deltas.len() {
                8 => {
                    unsafe { prefix_sum8_avx2(deltas.as_mut_ptr(), base) };
                    return;
                }
                16 => {
                    unsafe { prefix_sum8_avx2(deltas.as_mut_ptr(), base) };
                    let carry = deltas[7];
                    unsafe { prefix_sum8_avx2(deltas.as_mut_ptr().add(8), carry) };
                    return;
                }
                _ => {}
            }
        }
    }
    prefix_sum_scalar(deltas, base);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(deltas: &[i32], base: i32) {
        let mut simd = deltas.to_vec();
        let mut scalar = deltas.to_vec();
        prefix_sum(&mut simd, base);
        prefix_sum_scalar(&mut scalar, base);
        assert_eq!(simd, scalar, "deltas={:?} base={}", deltas, base);
    }

    #[test]
    fn eight_wide() {
        check(&[5, 10, 15, 20, 1, 1, 1, 1], 100);
        check(&[0; 8], 0);
        check(&[1; 8], -1);
    }

    #[test]
    fn sixteen_wide() {
        let deltas: Vec<i32> = (1..=16).collect();
        check(&deltas, 41);
    }

    #[test]
    fn odd_lengths_fall_back_to_scalar() {
        check(&[3, 4, 5], 7);
        check(&[9], 0);
        check(&[], 12);
        let deltas: Vec<i32> = (0..12).collect();
        check(&deltas, 2);
    }

    #[test]
    fn absolute_values_from_doc_deltas() {
        // base = last doc before the block
        let mut deltas = [5, 10, 15, 20, 2, 2, 2, 2];
        prefix_sum(&mut deltas, 100);
        assert_eq!(deltas, [105, 115, 130, 150, 152, 154, 156, 158]);
    }
}
