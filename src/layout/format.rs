//! Computing region offsets/sizes and writing a fresh image layout.

use crate::core::config::ImageConfig;
use crate::core::error::Result;
use crate::layout::branch_table::RECORD_SIZE;
use crate::layout::superblock::{Superblock, SUPERBLOCK_SIZE};
use crate::storage::window::StorageWindow;

/// Result of laying out a fresh image: the superblock plus the byte ranges
/// callers need to go initialize (base image, branch table, delta region).
pub struct Layout {
    /// The computed superblock.
    pub superblock: Superblock,
}

/// Compute the region layout for a fresh image of `config.total_size` bytes,
/// reserving room for an embedded base image of `base_image_size` bytes (0
/// if there is none) whose inode table holds `base_inode_count` inodes (also
/// 0 if there is none) — needed so the superblock's `next_inode_id` starts
/// past every id the base image already uses (§3).
pub fn plan(config: &ImageConfig, base_image_size: u64, base_inode_count: u64) -> Layout {
    let branch_table_offset = SUPERBLOCK_SIZE as u64;
    let branch_table_bytes = config.branch_table_entries as u64 * RECORD_SIZE as u64;

    let base_image_offset = branch_table_offset + branch_table_bytes;
    let delta_region_offset = base_image_offset + base_image_size;
    let delta_region_size = config.total_size.saturating_sub(delta_region_offset);

    let superblock = Superblock::new(
        config.total_size,
        if base_image_size > 0 { base_image_offset } else { 0 },
        base_image_size,
        branch_table_offset,
        config.branch_table_entries,
        delta_region_offset,
        delta_region_size,
        base_inode_count,
    );

    Layout { superblock }
}

/// Format a brand-new image onto `window`: zero the branch table, write the
/// superblock. Does not populate the base image; callers that want one
/// write it into the reserved region before calling this (or after, since
/// the base image is read-only and never overlaps the delta region).
pub fn write_fresh(window: &StorageWindow, layout: &Layout) -> Result<()> {
    let sb = &layout.superblock;

    let table_bytes = sb.branch_table_capacity as usize * RECORD_SIZE;
    window.zero(sb.branch_table_offset, table_bytes as u64)?;

    window.write(0, &sb.encode())?;
    window.sync()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ImageConfig;
    use std::path::PathBuf;

    #[test]
    fn plans_reasonable_offsets() {
        let cfg = ImageConfig {
            path: PathBuf::from("/tmp/unused"),
            total_size: 1 << 20,
            branch_table_entries: 16,
            base_image_path: None,
        };
        let layout = plan(&cfg, 0, 0);
        let sb = layout.superblock;
        assert_eq!(sb.branch_table_offset, SUPERBLOCK_SIZE as u64);
        assert_eq!(sb.base_image_offset, 0);
        assert!(sb.delta_region_offset > sb.branch_table_offset);
        assert!(sb.delta_region_size < sb.total_size);
    }
}
