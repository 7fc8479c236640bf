//! # Memory Protection
//!
//! Region permissions as declared by the program loader. They are recorded
//! on every region but not enforced: every resident page is installed
//! writable.

use bitflags::bitflags;

bitflags! {
    /// Memory protection flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProtectionFlags: u32 {
        /// No access
        const NONE = 0;
        /// Read access
        const READ = 1 << 0;
        /// Write access
        const WRITE = 1 << 1;
        /// Execute access
        const EXECUTE = 1 << 2;
        /// Read + Write
        const RW = Self::READ.bits() | Self::WRITE.bits();
        /// Read + Execute
        const RX = Self::READ.bits() | Self::EXECUTE.bits();
        /// Read + Write + Execute
        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

impl ProtectionFlags {
    /// Build from the loader's separate permission bits
    pub fn from_rwx(readable: bool, writeable: bool, executable: bool) -> Self {
        let mut flags = Self::NONE;
        flags.set(Self::READ, readable);
        flags.set(Self::WRITE, writeable);
        flags.set(Self::EXECUTE, executable);
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rwx() {
        assert_eq!(ProtectionFlags::from_rwx(true, false, true), ProtectionFlags::RX);
        assert_eq!(ProtectionFlags::from_rwx(true, true, true), ProtectionFlags::RWX);
        assert!(ProtectionFlags::from_rwx(false, false, false).is_empty());
    }
}
