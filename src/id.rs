//! Node identifier types.

use std::fmt;

/// A 160-bit identifier that implements a non-euclidian XOR-based distance metric.
///
/// Identifiers are ordered by their raw big-endian byte value, which makes the
/// XOR distance between two identifiers a total order over distinct peers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Kuid {
    bytes: [u8; Self::BYTES],
}

impl Kuid {
    /// The size of the identifier in bytes.
    pub const BYTES: usize = 20;

    /// The size of the identifier in bits.
    pub const BITS: usize = 20 * 8;

    /// The smallest identifier in the space.
    pub const MIN: Kuid = Kuid {
        bytes: [u8::MIN; Self::BYTES],
    };

    /// The largest identifier in the space.
    pub const MAX: Kuid = Kuid {
        bytes: [u8::MAX; Self::BYTES],
    };

    /// Creates a new identifier from the supplied bytes.
    pub fn new(bytes: [u8; Self::BYTES]) -> Self {
        Kuid { bytes }
    }

    /// Returns the bytes backing the identifier.
    pub fn bytes(&self) -> [u8; Self::BYTES] {
        self.bytes
    }

    #[doc(hidden)]
    /// Convenience function for working with small identifiers during testing; the raw value
    /// occupies the two most-significant bytes.
    pub fn from_u16(raw: u16) -> Self {
        let mut bytes = [0u8; Self::BYTES];
        bytes[..2].copy_from_slice(&raw.to_be_bytes());

        Self { bytes }
    }

    #[doc(hidden)]
    /// Convenience function for generating random identifiers during testing.
    pub fn rand() -> Self {
        use rand::{thread_rng, Fill};

        let mut rng = thread_rng();
        let mut bytes = [0u8; Self::BYTES];
        let _res = bytes.try_fill(&mut rng);
        debug_assert!(_res.is_ok());

        Self { bytes }
    }

    /// Computes the XOR distance between two identifiers.
    pub fn xor(&self, other: &Kuid) -> Distance {
        let mut bytes = [0u8; Self::BYTES];
        for (i, (&a, &b)) in self.bytes.iter().zip(other.bytes.iter()).enumerate() {
            bytes[i] = a ^ b;
        }

        Distance(bytes)
    }

    /// Returns the bit at the given index (0 is the most-significant bit).
    pub fn bit(&self, index: usize) -> bool {
        debug_assert!(index < Self::BITS);
        (self.bytes[index >> 3] >> (7 - (index & 7))) & 1 == 1
    }

    /// Returns a copy of this identifier with the bit at the given index set to `value`.
    pub fn with_bit(&self, index: usize, value: bool) -> Self {
        debug_assert!(index < Self::BITS);
        let mut bytes = self.bytes;
        let mask = 1u8 << (7 - (index & 7));
        if value {
            bytes[index >> 3] |= mask;
        } else {
            bytes[index >> 3] &= !mask;
        }

        Self { bytes }
    }

    /// Generates a random identifier that shares its first `depth` bits with `prefix`.
    ///
    /// A lookup targeting the returned identifier necessarily lands in the bucket
    /// identified by (`prefix`, `depth`).
    pub fn random_within(prefix: &Kuid, depth: usize) -> Self {
        debug_assert!(depth <= Self::BITS);

        let mut id = Self::rand();
        for i in 0..depth {
            id = id.with_bit(i, prefix.bit(i));
        }

        id
    }
}

impl fmt::Display for Kuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.bytes {
            write!(f, "{byte:02x}")?;
        }

        Ok(())
    }
}

impl fmt::Debug for Kuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kuid({self})")
    }
}

/// The XOR distance between two identifiers, ordered from closest to furthest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Distance([u8; Kuid::BYTES]);

impl Distance {
    /// Returns the bytes backing the distance.
    pub fn bytes(&self) -> [u8; Kuid::BYTES] {
        self.0
    }
}
