//! 16-bit serial number arithmetic (RFC 1982).
//!
//! PAN versions wrap around; comparing them with plain `>` would make a border
//! router that rolls over from 0xFFFF to 0 look like a stale configuration.

/// Half of the 16-bit serial space.
const SERIAL_HALF: u16 = 0x8000;

/// Returns true if `a` is newer than `b` in 16-bit serial arithmetic.
///
/// Undefined pairs (distance exactly 0x8000) compare as not greater in either
/// direction, so neither side is adopted.
#[inline]
pub fn serial_gt(a: u16, b: u16) -> bool {
    let forward = a.wrapping_sub(b);
    forward != 0 && forward < SERIAL_HALF
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISTANCES: [u16; 10] = [0, 1, 2, 0x7FFE, 0x7FFF, 0x8000, 0x8001, 0x8002, 0xFFFE, 0xFFFF];

    #[test]
    fn test_simple_ordering() {
        assert!(serial_gt(2, 1));
        assert!(!serial_gt(1, 2));
        assert!(!serial_gt(7, 7));
    }

    #[test]
    fn test_wraparound() {
        assert!(serial_gt(0, 0xFFFF));
        assert!(serial_gt(0x0010, 0xFFF0));
        assert!(!serial_gt(0xFFFF, 0));
        assert!(serial_gt(0x7FFF, 0));
        assert!(!serial_gt(0x8000, 0));
        assert!(!serial_gt(0, 0x8000));
        assert!(serial_gt(0, 0x8001));
    }

    #[test]
    fn test_every_base_at_boundary_distances() {
        for a in 0..=u16::MAX {
            for &d in DISTANCES.iter() {
                let b = a.wrapping_add(d);
                let gt = serial_gt(b, a);
                let lt = serial_gt(a, b);

                // Antisymmetric, and never both.
                assert!(!(gt && lt), "a={a:#06x} d={d:#06x}");

                match d {
                    0 | 0x8000 => assert!(!gt && !lt, "a={a:#06x} d={d:#06x}"),
                    1..=0x7FFF => assert!(gt && !lt, "a={a:#06x} d={d:#06x}"),
                    _ => assert!(lt && !gt, "a={a:#06x} d={d:#06x}"),
                }

                // Shifting both operands by half the space leaves the relation unchanged.
                let shift = SERIAL_HALF;
                assert_eq!(gt, serial_gt(b.wrapping_add(shift), a.wrapping_add(shift)));
            }
        }
    }

    #[test]
    fn test_half_space_symmetry() {
        // greater(a, b) == greater(b, a + 0x8000) for every distance except the undefined ones.
        for a in [0u16, 1, 0x7FFF, 0x8000, 0x8001, 0xFFFF] {
            for d in 1..=u16::MAX {
                if d == 0x8000 {
                    continue;
                }
                let b = a.wrapping_add(d);
                let opposite = a.wrapping_add(SERIAL_HALF);
                if b == opposite {
                    continue;
                }
                assert_eq!(serial_gt(a, b), serial_gt(b, opposite), "a={a:#06x} b={b:#06x}");
            }
        }
    }
}
