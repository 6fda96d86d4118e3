//! VMware vSphere payload adapter

use serde_json::Value;

use super::{
    NormalizedVm, SourceAdapter, array_field, bool_field, float_field, int_field, list_or_keyed,
    nested_keyed, object_field, required_id, str_field, timestamp_field,
};
use crate::error::Result;
use crate::model::{
    DiskRecord, HostRecord, IpRecord, NetworkRecord, NicRecord, Platform, VmFactValues,
};

/// Hypervisor kind reported for every VMware VM
pub const VMWARE_HYPERVISOR: &str = "ESXi";

/// Adapter for the vSphere inventory API
#[derive(Debug, Clone, Copy, Default)]
pub struct VmwareAdapter;

impl VmwareAdapter {
    fn facts(record: &Value) -> VmFactValues {
        let cpu = object_field(record, "cpu");
        let ram = object_field(record, "ram");
        let summary = object_field(record, "summary");

        VmFactValues {
            power_state: str_field(record, "status"),
            hypervisor_type: Some(VMWARE_HYPERVISOR.to_string()),
            cluster_name: str_field(record, "cluster"),
            host_identifier: str_field(record, "host"),
            os_type: str_field(record, "os_type"),
            os_family: str_field(record, "os_family"),
            hostname: str_field(record, "host_name"),
            total_vcpus: int_field(cpu, "total_vcpus"),
            num_sockets: int_field(cpu, "num_sockets"),
            cores_per_socket: int_field(cpu, "cores_per_socket"),
            vcpus_per_socket: int_field(cpu, "vcpus_per_socket"),
            threads_per_core: None,
            cpu_hot_add: bool_field(cpu, "hot_add_enabled"),
            cpu_hot_remove: bool_field(cpu, "hot_remove_enabled"),
            memory_mb: int_field(ram, "size_mib"),
            mem_hot_add: bool_field(ram, "hot_add_enabled"),
            mem_hot_add_limit_mb: int_field(ram, "hot_add_limit_mib"),
            total_disks: int_field(summary, "total_disks"),
            total_disk_gb: Some(float_field(summary, "total_disk_size_gib").unwrap_or(0.0)),
            total_nics: int_field(summary, "total_nics"),
            creation_date: timestamp_field(record, "creation_date"),
            last_update_date: timestamp_field(record, "last_update_date"),
        }
    }

    fn nics(record: &Value) -> Vec<NicRecord> {
        array_field(record, "nics")
            .iter()
            .map(|nic| NicRecord {
                nic_uuid: None,
                label: str_field(nic, "label"),
                mac_address: str_field(nic, "mac_address"),
                nic_type: str_field(nic, "nic_type"),
                network_name: str_field(nic, "network"),
                vlan_mode: None,
                is_connected: bool_field(nic, "is_connected"),
                state: str_field(nic, "state"),
                ip_addresses: array_field(nic, "ip_addresses")
                    .iter()
                    .filter_map(|ip| {
                        str_field(ip, "ip").map(|address| IpRecord::new(address, str_field(ip, "type")))
                    })
                    .collect(),
            })
            .collect()
    }

    fn disks(record: &Value) -> Vec<DiskRecord> {
        array_field(record, "disks")
            .iter()
            .map(|disk| DiskRecord {
                disk_uuid: None,
                disk_key: str_field(disk, "key"),
                disk_label: str_field(disk, "label"),
                device_type: str_field(disk, "device_type"),
                adapter_type: str_field(disk, "adapter_type"),
                size_gb: float_field(disk, "size_gib").unwrap_or(0.0),
                backing_type: str_field(disk, "backing_type"),
                backing_path: str_field(disk, "vmdk_file"),
                storage_name: None,
                is_image: bool_field(disk, "is_image"),
                scsi_bus: int_field(disk, "scsi_bus"),
                scsi_unit: int_field(disk, "scsi_unit"),
            })
            .collect()
    }
}

impl SourceAdapter for VmwareAdapter {
    fn platform(&self) -> Platform {
        Platform::Vmware
    }

    fn vm_records<'a>(&self, payload: &'a Value) -> Vec<&'a Value> {
        list_or_keyed(payload, "vms")
    }

    fn normalize_vm(&self, record: &Value) -> Result<NormalizedVm> {
        Ok(NormalizedVm {
            vm_uuid: required_id(record, "uuid")?,
            name: str_field(record, "name"),
            bios_uuid: str_field(record, "bios_uuid"),
            facts: Self::facts(record),
            nics: Self::nics(record),
            disks: Self::disks(record),
            raw: record.clone(),
        })
    }

    fn host_records<'a>(&self, payload: &'a Value) -> Vec<&'a Value> {
        list_or_keyed(payload, "hosts")
    }

    fn normalize_host(&self, record: &Value) -> Result<HostRecord> {
        let host_id = required_id(record, "host")?;

        Ok(HostRecord {
            hostname: str_field(record, "name").unwrap_or_else(|| host_id.clone()),
            hypervisor_ip: str_field(record, "ip"),
            hypervisor_name: str_field(record, "version"),
            cpu_model: str_field(record, "cpu_model"),
            cpu_cores_physical: int_field(record, "cpu_cores"),
            ram_gb: float_field(record, "memory_gb").map(|gb| gb.round() as i64),
            host_id,
        })
    }

    fn network_records<'a>(&self, payload: &'a Value) -> Vec<&'a Value> {
        // `[{"vm-network": [...]}]` from the inventory API, plain lists otherwise
        match payload {
            Value::Array(items) if items.iter().any(|i| i.get("vm-network").is_some()) => {
                nested_keyed(payload, "vm-network")
            }
            _ => list_or_keyed(payload, "networks"),
        }
    }

    fn normalize_network(&self, record: &Value) -> Result<NetworkRecord> {
        Ok(NetworkRecord {
            network_id: required_id(record, "network")?,
            name: required_id(record, "name")?,
            vlan_id: int_field(record, "vlan_id"),
            description: str_field(record, "description"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{adapt_networks, adapt_vms};
    use serde_json::json;

    fn sample_vm() -> Value {
        json!({
            "uuid": "4210a1b2-0000-0000-0000-000000000001",
            "name": "web-01",
            "bios_uuid": "bios-01",
            "status": "POWERED_ON",
            "cluster": "prod-cluster",
            "host": "esx-07.lab",
            "os_type": "Ubuntu Linux (64-bit)",
            "os_family": "LINUX",
            "host_name": "web-01.lab",
            "cpu": {"total_vcpus": 4, "num_sockets": 2, "cores_per_socket": 2,
                    "vcpus_per_socket": 2, "hot_add_enabled": true, "hot_remove_enabled": false},
            "ram": {"size_mib": 8192, "hot_add_enabled": true, "hot_add_limit_mib": 16384},
            "summary": {"total_disks": 1, "total_disk_size_gib": 40.0, "total_nics": 1},
            "creation_date": "2023-11-02T08:15:00Z",
            "last_update_date": "N/A",
            "nics": [{
                "label": "Network adapter 1",
                "mac_address": "00:50:56:aa:bb:cc",
                "nic_type": "VMXNET3",
                "network": "VM Network",
                "is_connected": true,
                "state": "CONNECTED",
                "ip_addresses": [{"ip": "10.0.0.5", "type": "ipv4"}, {"type": "ipv6"}]
            }],
            "disks": [{
                "key": "2000",
                "label": "Hard disk 1",
                "device_type": "DISK",
                "adapter_type": "SCSI",
                "size_gib": 40,
                "backing_type": "VMDK",
                "vmdk_file": "[ds01] web-01/web-01.vmdk",
                "is_image": false,
                "scsi_bus": 0,
                "scsi_unit": 0
            }]
        })
    }

    #[test]
    fn normalizes_full_vm_record() {
        let vm = VmwareAdapter.normalize_vm(&sample_vm()).unwrap();

        assert_eq!(vm.vm_uuid, "4210a1b2-0000-0000-0000-000000000001");
        assert_eq!(vm.name.as_deref(), Some("web-01"));
        assert_eq!(vm.facts.hypervisor_type.as_deref(), Some("ESXi"));
        assert_eq!(vm.facts.total_vcpus, Some(4));
        assert_eq!(vm.facts.cores_per_socket, Some(2));
        assert_eq!(vm.facts.memory_mb, Some(8192));
        assert_eq!(vm.facts.mem_hot_add_limit_mb, Some(16384));
        assert_eq!(vm.facts.total_disk_gb, Some(40.0));
        assert_eq!(vm.facts.hostname.as_deref(), Some("web-01.lab"));
        assert!(vm.facts.creation_date.is_some());
        assert!(vm.facts.last_update_date.is_none());

        assert_eq!(vm.nics.len(), 1);
        assert_eq!(vm.nics[0].network_name.as_deref(), Some("VM Network"));
        // address-less IP entries are dropped
        assert_eq!(vm.nics[0].ip_addresses, vec![IpRecord::new("10.0.0.5", Some("ipv4".into()))]);

        assert_eq!(vm.disks[0].disk_key.as_deref(), Some("2000"));
        assert_eq!(vm.disks[0].backing_path.as_deref(), Some("[ds01] web-01/web-01.vmdk"));
        assert_eq!(vm.disks[0].size_gb, 40.0);
        assert_eq!(vm.raw, sample_vm());
    }

    #[test]
    fn accepts_bare_list_and_wrapped_envelope() {
        let bare = json!([sample_vm()]);
        let wrapped = json!({"vms": [sample_vm(), sample_vm()]});

        assert_eq!(adapt_vms(Platform::Vmware, &bare).records.len(), 1);
        assert_eq!(adapt_vms(Platform::Vmware, &wrapped).records.len(), 2);
    }

    #[test]
    fn host_falls_back_to_id_for_name() {
        let host = VmwareAdapter
            .normalize_host(&json!({"host": "host-42", "ip": "10.1.1.7", "memory_gb": 511.8}))
            .unwrap();

        assert_eq!(host.host_id, "host-42");
        assert_eq!(host.hostname, "host-42");
        assert_eq!(host.ram_gb, Some(512));
    }

    #[test]
    fn networks_from_vm_network_envelope() {
        let payload = json!([
            {"vm-network": [
                {"network": "network-11", "name": "VM Network"},
                {"network": "network-12"}
            ]}
        ]);

        let adapted = adapt_networks(Platform::Vmware, &payload);
        assert_eq!(adapted.records.len(), 1);
        assert_eq!(adapted.records[0].network_id, "network-11");
        assert_eq!(adapted.records[0].vlan_id, None);
        assert_eq!(adapted.skipped.len(), 1);
    }

    #[test]
    fn networks_from_plain_list() {
        let payload = json!([{"network": "network-20", "name": "DMZ", "vlan_id": 120}]);

        let adapted = adapt_networks(Platform::Vmware, &payload);
        assert_eq!(adapted.records[0].vlan_id, Some(120));
    }
}
