//! N3000 firmware provisioning
//!
//! FPGA user images are flashed with the OPAE tools, the on-card Fortville
//! NICs with Intel's nvmupdate package. Both are fetched over HTTP first.

pub mod download;
pub mod fortville;
pub mod fpga;
pub mod nvmupdate;

pub use download::{FirmwareDownloader, FirmwareFetcher, verify_md5};
pub use fortville::FortvilleManager;
pub use fpga::{FpgaManager, parse_fpgainfo_bmc};
pub use nvmupdate::{NvmUpdateReport, parse_report, parse_report_bounded};
