//! Nutanix AHV payload adapter

use serde_json::Value;

use super::{
    NormalizedVm, SourceAdapter, array_field, bool_field, float_field, int_field, list_or_keyed,
    nested_keyed, object_field, required_id, str_field, timestamp_field,
};
use crate::error::Result;
use crate::model::{
    DiskRecord, HostRecord, IpRecord, NetworkRecord, NicRecord, Platform, VmFactValues,
};

/// Hypervisor kind assumed when the payload does not name one
pub const DEFAULT_NUTANIX_HYPERVISOR: &str = "AHV";

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Adapter for the Prism inventory API
#[derive(Debug, Clone, Copy, Default)]
pub struct NutanixAdapter;

impl NutanixAdapter {
    fn facts(record: &Value) -> VmFactValues {
        let cpu = object_field(record, "cpu");
        let ram = object_field(record, "ram");
        let summary = object_field(record, "summary");

        VmFactValues {
            power_state: str_field(record, "status"),
            hypervisor_type: Some(
                str_field(record, "hypervisor_type")
                    .unwrap_or_else(|| DEFAULT_NUTANIX_HYPERVISOR.to_string()),
            ),
            cluster_name: str_field(record, "cluster"),
            host_identifier: str_field(record, "host"),
            os_type: str_field(record, "os_type"),
            os_family: None,
            hostname: None,
            total_vcpus: int_field(cpu, "total_vcpus"),
            num_sockets: int_field(cpu, "num_sockets"),
            cores_per_socket: None,
            vcpus_per_socket: int_field(cpu, "vcpus_per_socket"),
            threads_per_core: int_field(cpu, "threads_per_core"),
            cpu_hot_add: None,
            cpu_hot_remove: None,
            memory_mb: int_field(ram, "size_mib"),
            mem_hot_add: None,
            mem_hot_add_limit_mb: None,
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
                nic_uuid: str_field(nic, "uuid"),
                label: None,
                mac_address: str_field(nic, "mac_address"),
                nic_type: str_field(nic, "nic_type"),
                network_name: str_field(nic, "subnet"),
                vlan_mode: str_field(nic, "vlan_mode"),
                is_connected: bool_field(nic, "is_connected"),
                state: None,
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
                disk_uuid: str_field(disk, "uuid"),
                disk_key: None,
                disk_label: None,
                device_type: str_field(disk, "device_type"),
                adapter_type: str_field(disk, "adapter_type"),
                size_gb: float_field(disk, "size_gib").unwrap_or(0.0),
                backing_type: None,
                backing_path: None,
                storage_name: str_field(disk, "storage_container"),
                is_image: bool_field(disk, "is_image"),
                scsi_bus: None,
                scsi_unit: int_field(disk, "device_index"),
            })
            .collect()
    }
}

impl SourceAdapter for NutanixAdapter {
    fn platform(&self) -> Platform {
        Platform::Nutanix
    }

    fn vm_records<'a>(&self, payload: &'a Value) -> Vec<&'a Value> {
        nested_keyed(payload, "vms")
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
        let host_id = required_id(record, "uuid")?;

        Ok(HostRecord {
            hostname: str_field(record, "name").unwrap_or_else(|| host_id.clone()),
            hypervisor_ip: str_field(record, "hypervisor_address"),
            hypervisor_name: str_field(record, "hypervisor_full_name"),
            cpu_model: str_field(record, "cpu_model"),
            cpu_cores_physical: int_field(record, "num_cpu_cores"),
            ram_gb: float_field(record, "memory_capacity_in_bytes")
                .map(|bytes| (bytes / BYTES_PER_GIB).round() as i64),
            host_id,
        })
    }

    fn network_records<'a>(&self, payload: &'a Value) -> Vec<&'a Value> {
        list_or_keyed(payload, "entities")
    }

    fn normalize_network(&self, record: &Value) -> Result<NetworkRecord> {
        Ok(NetworkRecord {
            network_id: required_id(record, "uuid")?,
            name: required_id(record, "name")?,
            vlan_id: int_field(record, "vlan_id"),
            description: str_field(record, "description"),
        })
    }
}
