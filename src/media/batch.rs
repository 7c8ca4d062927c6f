/// Splits the accepted assets into delivery-channel-sized groups,
/// preserving input order. The bound is the channel's per-message
/// attachment ceiling and comes from configuration.
pub fn batch_assets<T>(assets: &[T], max_batch_size: usize) -> Vec<&[T]> {
    assets.chunks(max_batch_size.max(1)).collect()
}
