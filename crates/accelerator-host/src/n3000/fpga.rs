//! N3000 FPGA inventory and user image programming (OPAE tools)

use crate::error::HostError;
use crate::exec::{CommandRunner, HostCommand};
use crds::N3000FpgaStatus;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Flashing a user image takes tens of minutes.
const FPGA_UPDATE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct FpgaManager {
    tools: Arc<dyn CommandRunner>,
}

impl FpgaManager {
    pub fn new(tools: Arc<dyn CommandRunner>) -> Self {
        Self { tools }
    }

    pub async fn inventory(&self) -> Result<Vec<N3000FpgaStatus>, HostError> {
        let output = self.tools.run(&HostCommand::new("fpgainfo").arg("bmc")).await?;
        Ok(parse_fpgainfo_bmc(&output))
    }

    /// Writes a user image to the card's flash.
    pub async fn program_user_image(&self, image: &Path, pci_addr: &str) -> Result<(), HostError> {
        info!("Programming FPGA {} with {}", pci_addr, image.display());
        let command = HostCommand::new("fpgasupdate")
            .args([image.to_string_lossy().into_owned(), pci_addr.to_string()])
            .timeout(FPGA_UPDATE_TIMEOUT);
        self.tools.run(&command).await?;
        Ok(())
    }

    /// Reloads the BMC and FPGA images from flash.
    pub async fn reload(&self, pci_addr: &str) -> Result<(), HostError> {
        info!("Reloading FPGA {} from flash", pci_addr);
        self.tools
            .run(&HostCommand::new("rsu").args(["bmcimg", pci_addr]))
            .await?;
        Ok(())
    }
}

/// Parses `fpgainfo bmc` into one status per card.
///
/// Each card's block starts with `Object Id`; sensor lines carry a
/// `( n)` index before the key.
pub fn parse_fpgainfo_bmc(output: &str) -> Vec<N3000FpgaStatus> {
    let mut cards = Vec::new();
    let mut current: Option<N3000FpgaStatus> = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once(": ") else {
            continue;
        };
        let key = key.trim();
        let key = match key.strip_prefix('(').and_then(|k| k.split_once(')')) {
            Some((_, rest)) => rest.trim(),
            None => key,
        };
        let value = value.trim().to_string();

        if key == "Object Id" {
            if let Some(card) = current.take() {
                cards.push(card);
            }
            current = Some(N3000FpgaStatus::default());
            continue;
        }
        let Some(card) = current.as_mut() else {
            continue;
        };
        match key {
            "PCIe s:b:d.f" => card.pci_addr = value.to_ascii_lowercase(),
            "Device Id" => card.device_id = value,
            "Bitstream Id" => card.bitstream_id = value,
            "Bitstream Version" => card.bitstream_version = value,
            "FPGA Core Temperature" => card.temperature = value,
            _ => {}
        }
    }
    cards.extend(current);
    cards.retain(|c| !c.pci_addr.is_empty());
    cards
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FakeCommandRunner;

    const FPGAINFO_BMC: &str = "\
Board Management Controller, MAX10 NIOS FW version D.2.0.12
Board Management Controller, MAX10 Build version D.2.0.6
//****** BMC SENSORS ******//
Object Id                     : 0xEF00000
PCIe s:b:d.f                  : 0000:1B:00.0
Device Id                     : 0x0b30
Numa Node                     : 0
Ports Num                     : 01
Bitstream Id                  : 0x23000410010310
Bitstream Version             : 0.2.3
Pr Interface Id               : f3c99413-5081-4aad-bced-07eb84a6d0bb
( 1) Board Power              : 69.24 Watts
(12) FPGA Core Temperature    : 55.00 Celsius
Object Id                     : 0xEE00000
PCIe s:b:d.f                  : 0000:5E:00.0
Device Id                     : 0x0b30
Bitstream Id                  : 0x23000410010310
Bitstream Version             : 0.2.3
(12) FPGA Core Temperature    : 51.50 Celsius
";

    #[test]
    fn test_parse_two_cards() {
        let cards = parse_fpgainfo_bmc(FPGAINFO_BMC);
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].pci_addr, "0000:1b:00.0");
        assert_eq!(cards[0].device_id, "0x0b30");
        assert_eq!(cards[0].bitstream_id, "0x23000410010310");
        assert_eq!(cards[0].bitstream_version, "0.2.3");
        assert_eq!(cards[0].temperature, "55.00 Celsius");
        assert_eq!(cards[1].pci_addr, "0000:5e:00.0");
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_fpgainfo_bmc("").is_empty());
    }

    #[tokio::test]
    async fn test_program_and_reload_commands() {
        let runner = FakeCommandRunner::new();
        let fpga = FpgaManager::new(Arc::new(runner.clone()));
        fpga.program_user_image(Path::new("/work/user.bin"), "0000:1b:00.0")
            .await
            .unwrap();
        fpga.reload("0000:1b:00.0").await.unwrap();

        assert_eq!(
            runner.command_lines(),
            vec![
                "fpgasupdate /work/user.bin 0000:1b:00.0",
                "rsu bmcimg 0000:1b:00.0"
            ]
        );
        assert_eq!(runner.calls()[0].timeout, Some(FPGA_UPDATE_TIMEOUT));
    }
}
