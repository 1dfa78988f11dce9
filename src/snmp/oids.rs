//! Canonical object identifiers read by the collectors
//!
//! Arcs are stored as slices so they can be turned into [`Oid`] without parsing.

use super::Oid;

pub const DEFAULT_PORT: u16 = 161;

// SNMPv2-MIB system group
pub const SYS_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];
pub const SYS_UPTIME: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 3, 0];
pub const SYS_NAME: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 5, 0];

// UCD-SNMP-MIB raw CPU counters
pub const CPU_RAW_USER: &[u32] = &[1, 3, 6, 1, 4, 1, 2021, 11, 50, 0];
pub const CPU_RAW_SYSTEM: &[u32] = &[1, 3, 6, 1, 4, 1, 2021, 11, 52, 0];
pub const CPU_RAW_IDLE: &[u32] = &[1, 3, 6, 1, 4, 1, 2021, 11, 53, 0];

// UCD-SNMP-MIB memory (kB)
pub const MEM_TOTAL_REAL: &[u32] = &[1, 3, 6, 1, 4, 1, 2021, 4, 5, 0];
pub const MEM_AVAIL_REAL: &[u32] = &[1, 3, 6, 1, 4, 1, 2021, 4, 6, 0];

// HOST-RESOURCES-MIB hrStorageTable columns
pub const HR_STORAGE_ALLOC_UNITS: &[u32] = &[1, 3, 6, 1, 2, 1, 25, 2, 3, 1, 4];
pub const HR_STORAGE_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 25, 2, 3, 1, 3];
pub const HR_STORAGE_SIZE: &[u32] = &[1, 3, 6, 1, 2, 1, 25, 2, 3, 1, 5];
pub const HR_STORAGE_USED: &[u32] = &[1, 3, 6, 1, 2, 1, 25, 2, 3, 1, 6];

/// Storage rows tried for the root filesystem, in order
pub const ROOT_STORAGE_CANDIDATES: &[u32] = &[36, 1, 2, 3];

// IF-MIB ifTable columns
pub const IF_INDEX: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 1];
pub const IF_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 2];
pub const IF_SPEED: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 5];
pub const IF_ADMIN_STATUS: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 7];
pub const IF_OPER_STATUS: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 8];
pub const IF_IN_OCTETS: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 10];
pub const IF_IN_ERRORS: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 14];
pub const IF_OUT_OCTETS: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 16];
pub const IF_OUT_ERRORS: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 20];

// BRIDGE-MIB
pub const DOT1D_BASE_PORT_IF_INDEX: &[u32] = &[1, 3, 6, 1, 2, 1, 17, 1, 4, 1, 2];
pub const DOT1D_TP_FDB_ADDRESS: &[u32] = &[1, 3, 6, 1, 2, 1, 17, 4, 3, 1, 1];
pub const DOT1D_TP_FDB_PORT: &[u32] = &[1, 3, 6, 1, 2, 1, 17, 4, 3, 1, 2];

/// Build an [`Oid`] from one of the constants above
pub fn oid(arcs: &[u32]) -> Oid {
    Oid::from(arcs)
}

/// Column OID for a specific table row (`column.index`)
pub fn row(column: &[u32], index: u32) -> Oid {
    oid(column).child(index)
}
