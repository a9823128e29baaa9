//! nvmupdate64e XML reports
//!
//! Both the inventory (`-i`) and the update (`-u`) runs write an XML report
//! with one `Instance` per NIC port. Reports are parsed off the async runtime
//! with a size cap and a deadline.

use crate::error::HostError;
use std::time::Duration;
use sxd_document::dom::Element;
use sxd_document::parser;
use sxd_xpath::{Value, evaluate_xpath};

/// Largest report accepted.
pub const MAX_REPORT_BYTES: usize = 1024 * 1024;

/// Deadline for parsing a single report.
pub const PARSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NvmUpdateReport {
    pub instances: Vec<NvmInstance>,
    pub power_cycle_required: bool,
    pub reboot_required: bool,
    pub next_update_available: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NvmInstance {
    pub vendor: String,
    pub device: String,
    pub bus: String,
    pub dev: String,
    pub func: String,
    pub display: String,
    pub modules: Vec<NvmModule>,
    pub macs: Vec<String>,
}

impl NvmInstance {
    /// PCI address assembled from the decimal bus/dev/func attributes.
    pub fn pci_address(&self) -> String {
        let num = |s: &str| s.trim().parse::<u32>().unwrap_or(0);
        format!(
            "0000:{:02x}:{:02x}.{:x}",
            num(&self.bus),
            num(&self.dev),
            num(&self.func)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NvmModule {
    pub type_: String,
    pub version: String,
    /// `Status/@result`, present only on update reports
    pub result: Option<String>,
}

impl NvmUpdateReport {
    /// Module results other than `Success`, as `device/module: result`.
    pub fn failures(&self) -> Vec<String> {
        self.instances
            .iter()
            .flat_map(|i| {
                i.modules.iter().filter_map(move |m| match m.result.as_deref() {
                    Some(r) if r != "Success" => Some(format!("{}/{}: {}", i.device, m.type_, r)),
                    _ => None,
                })
            })
            .collect()
    }
}

fn child_elements<'d>(element: Element<'d>, name: &str) -> Vec<Element<'d>> {
    element
        .children()
        .into_iter()
        .filter_map(|c| c.element())
        .filter(|e| e.name().local_part() == name)
        .collect()
}

fn attr(element: Element<'_>, name: &str) -> String {
    element.attribute_value(name).unwrap_or_default().to_string()
}

fn flag(doc: &sxd_document::dom::Document<'_>, name: &str) -> Result<bool, HostError> {
    let value = evaluate_xpath(doc, &format!("string(/*/{name})"))
        .map_err(|e| HostError::parse("nvmupdate report", format!("{e:?}")))?;
    Ok(value.string().trim() == "1")
}

/// Parses a report synchronously.
pub fn parse_report(xml: &str) -> Result<NvmUpdateReport, HostError> {
    let package =
        parser::parse(xml).map_err(|e| HostError::parse("nvmupdate report", format!("{e:?}")))?;
    let doc = package.as_document();

    let nodes = match evaluate_xpath(&doc, "/*/Instance")
        .map_err(|e| HostError::parse("nvmupdate report", format!("{e:?}")))?
    {
        Value::Nodeset(nodes) => nodes.document_order(),
        _ => Vec::new(),
    };

    let mut instances = Vec::new();
    for element in nodes.into_iter().filter_map(|n| n.element()) {
        let modules = child_elements(element, "Module")
            .into_iter()
            .map(|m| NvmModule {
                type_: attr(m, "type"),
                version: attr(m, "version"),
                result: child_elements(m, "Status")
                    .first()
                    .and_then(|s| s.attribute_value("result"))
                    .map(str::to_string),
            })
            .collect();
        let macs = child_elements(element, "MACAddresses")
            .into_iter()
            .flat_map(|list| child_elements(list, "MAC"))
            .map(|mac| attr(mac, "address"))
            .filter(|mac| !mac.is_empty())
            .collect();
        instances.push(NvmInstance {
            vendor: attr(element, "vendor"),
            device: attr(element, "device"),
            bus: attr(element, "bus"),
            dev: attr(element, "dev"),
            func: attr(element, "func"),
            display: attr(element, "display"),
            modules,
            macs,
        });
    }

    Ok(NvmUpdateReport {
        instances,
        power_cycle_required: flag(&doc, "PowerCycleRequired")?,
        reboot_required: flag(&doc, "RebootRequired")?,
        next_update_available: flag(&doc, "NextUpdateAvailable")?,
    })
}

/// Parses a report on a blocking thread, bounded in size and time.
pub async fn parse_report_bounded(xml: String) -> Result<NvmUpdateReport, HostError> {
    if xml.len() > MAX_REPORT_BYTES {
        return Err(HostError::parse(
            "nvmupdate report",
            format!("{} bytes exceeds the {} byte limit", xml.len(), MAX_REPORT_BYTES),
        ));
    }
    let task = tokio::task::spawn_blocking(move || parse_report(&xml));
    match tokio::time::timeout(PARSE_TIMEOUT, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(HostError::parse("nvmupdate report", join.to_string())),
        Err(_elapsed) => Err(HostError::parse(
            "nvmupdate report",
            format!("parsing exceeded {}s", PARSE_TIMEOUT.as_secs()),
        )),
    }
}

#[cfg(test)]
pub(crate) fn update_report(next_update: bool, reboot: bool, result: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<DeviceUpdate lang="en">
  <Instance vendor="8086" device="d58" subdevice="1" subvendor="8086" bus="27" dev="0" func="0" PBA="K47162-006" port_id="Port 1 of 2" display="Intel(R) Ethernet Controller XXV710 for 25GbE backplane">
    <Module type="NVM" version="8000191B" previous_version="8000143D" display="">
      <Status result="{result}" id="0">All operations completed successfully.</Status>
    </Module>
    <MACAddresses>
      <MAC address="6805CA3AA1C0">
      </MAC>
    </MACAddresses>
  </Instance>
  <PowerCycleRequired>0</PowerCycleRequired>
  <RebootRequired>{}</RebootRequired>
  <NextUpdateAvailable>{}</NextUpdateAvailable>
</DeviceUpdate>
"#,
        u8::from(reboot),
        u8::from(next_update)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DeviceInventory lang="en">
  <Instance vendor="8086" device="d58" subdevice="1" subvendor="8086" bus="27" dev="0" func="1" display="Intel(R) Ethernet Controller XXV710 for 25GbE backplane">
    <Module type="PXE" version="1.0.2" display="Intel(R) Boot Agent XL"></Module>
    <Module type="NVM" version="8000191B" display="Intel(R) Ethernet Controller XXV710"></Module>
    <MACAddresses>
      <MAC address="6805CA3AA1C1"></MAC>
    </MACAddresses>
  </Instance>
</DeviceInventory>
"#;

    #[test]
    fn test_parse_inventory_report() {
        let report = parse_report(INVENTORY).unwrap();
        assert_eq!(report.instances.len(), 1);
        let nic = &report.instances[0];
        assert_eq!(nic.device, "d58");
        assert_eq!(nic.pci_address(), "0000:1b:00.1");
        assert_eq!(nic.macs, vec!["6805CA3AA1C1"]);
        assert_eq!(nic.modules.len(), 2);
        assert_eq!(nic.modules[1].type_, "NVM");
        assert_eq!(nic.modules[1].result, None);
        assert!(!report.next_update_available);
        assert!(report.failures().is_empty());
    }

    #[test]
    fn test_parse_update_report_flags() {
        let report = parse_report(&update_report(true, true, "Success")).unwrap();
        assert!(report.next_update_available);
        assert!(report.reboot_required);
        assert!(!report.power_cycle_required);
        assert_eq!(report.instances[0].modules[0].result.as_deref(), Some("Success"));
    }

    #[test]
    fn test_failed_module_is_reported() {
        let report = parse_report(&update_report(false, false, "Fail")).unwrap();
        assert_eq!(report.failures(), vec!["d58/NVM: Fail"]);
    }

    #[test]
    fn test_malformed_xml_is_error() {
        assert!(parse_report("<DeviceUpdate><Instance>").is_err());
    }

    #[tokio::test]
    async fn test_oversized_report_rejected() {
        let xml = "x".repeat(MAX_REPORT_BYTES + 1);
        let err = parse_report_bounded(xml).await.unwrap_err();
        assert!(matches!(err, HostError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_bounded_parse_matches_sync_parse() {
        let xml = update_report(false, false, "Success");
        assert_eq!(parse_report_bounded(xml.clone()).await.unwrap(), parse_report(&xml).unwrap());
    }
}
