//! Bitmap allocator (spec.md §4.2). One bit per data block id; bit set ⇒
//! allocated. `alloc_block` does an O(bitmap_size) linear scan for the
//! first clear bit — a cached free-list would be faster, but simplicity
//! beats it for a teaching filesystem.

use log::{trace, warn};

use crate::error::{EdfsError, EdfsResult};
use crate::image::ImageHandle;

/// Block id `b`'s bit lives at `bitmap_start + b/8`, bit `b % 8`.
pub struct BitmapAllocator<'a> {
    image: &'a ImageHandle,
}

impl<'a> BitmapAllocator<'a> {
    pub fn new(image: &'a ImageHandle) -> Self {
        BitmapAllocator { image }
    }

    /// Finds the first free bit, sets it, and returns the corresponding
    /// block id. The bitmap is read in full to find a candidate byte, but
    /// the actual set is a single-byte read-modify-write so that a
    /// concurrent allocator (were one ever added) could not clobber other
    /// bits sharing that byte.
    pub fn alloc_block(&self) -> EdfsResult<u32> {
        let sb = self.image.super_block();
        let mut bitmap = vec![0u8; sb.bitmap_size as usize];
        self.image.pread(sb.bitmap_start, &mut bitmap)?;

        let Some(byte_idx) = bitmap.iter().position(|&b| b != 0xFF) else {
            warn!("bitmap allocator: no free blocks");
            return Err(EdfsError::NoSpace);
        };
        let bit_idx = (0..8).find(|k| bitmap[byte_idx] & (1 << k) == 0).unwrap();

        let mut byte = [0u8; 1];
        self.image
            .pread(sb.bitmap_start + byte_idx as u64, &mut byte)?;
        byte[0] |= 1 << bit_idx;
        self.image
            .pwrite(sb.bitmap_start + byte_idx as u64, &byte)?;

        let block_id = (byte_idx as u32) * 8 + bit_idx as u32;
        trace!("allocated block {block_id}");
        Ok(block_id)
    }

    /// Clears the bit for `block`. Fails with `NotFound` if the bit was
    /// already clear.
    pub fn free_block(&self, block: u32) -> EdfsResult<()> {
        let sb = self.image.super_block();
        let byte_idx = (block / 8) as u64;
        let bit_idx = block % 8;

        let mut byte = [0u8; 1];
        self.image.pread(sb.bitmap_start + byte_idx, &mut byte)?;
        if byte[0] & (1 << bit_idx) == 0 {
            return Err(EdfsError::NotFound(format!(
                "block {block} is already free"
            )));
        }
        byte[0] &= !(1 << bit_idx);
        self.image.pwrite(sb.bitmap_start + byte_idx, &byte)?;
        trace!("freed block {block}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::fresh_image;

    #[test]
    fn alloc_then_free_round_trips() {
        let (_tmp, img) = fresh_image(1024, 16, 64);
        let alloc = super::BitmapAllocator::new(&img);
        let b0 = alloc.alloc_block().unwrap();
        let b1 = alloc.alloc_block().unwrap();
        assert_ne!(b0, b1);
        alloc.free_block(b0).unwrap();
        let b2 = alloc.alloc_block().unwrap();
        assert_eq!(b0, b2, "freed block should be reused first");
    }

    #[test]
    fn double_free_fails() {
        let (_tmp, img) = fresh_image(1024, 16, 64);
        let alloc = super::BitmapAllocator::new(&img);
        let b0 = alloc.alloc_block().unwrap();
        alloc.free_block(b0).unwrap();
        assert!(alloc.free_block(b0).is_err());
    }

    #[test]
    fn exhaustion_returns_nospc() {
        let (_tmp, img) = fresh_image(64, 2, 4);
        let alloc = super::BitmapAllocator::new(&img);
        let total_bits = img.super_block().bitmap_size as usize * 8;
        for _ in 0..total_bits {
            alloc.alloc_block().unwrap();
        }
        assert!(matches!(
            alloc.alloc_block(),
            Err(crate::error::EdfsError::NoSpace)
        ));
    }
}
