use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;

/// 乱数系列の派生に使う素数
const RNG_DERIVATION_PRIME: u64 = 0x9E37_79B9_7F4A_7C15;

/// シード値から決定的な乱数生成器を作成
pub fn create_rng(seed: u64) -> ChaCha12Rng {
    ChaCha12Rng::seed_from_u64(seed)
}

/// 試行番号ごとに独立した乱数系列のシードを派生
///
/// 同じ (seed, attempt) からは常に同じ値が得られます。
pub fn derive_seed(base_seed: u64, attempt: u64) -> u64 {
    base_seed.wrapping_add(attempt.wrapping_mul(RNG_DERIVATION_PRIME))
}
