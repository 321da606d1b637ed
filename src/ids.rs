// Identity store: the non-volatile safety identifiers and their
// write-through persistence. In-memory copies are only updated after the
// NV callback reports success; the OCPUNID table additionally rolls back
// its staged entry on failure.

use crate::assembly::Assemblies;
use crate::sapl::{ErrorCode, NvSlot, SafetyApp};
use crate::transport::{Command, Message, Transport};
use crate::types::{Scid, Unid};
use log::debug;

#[derive(Debug)]
pub struct IdentityStore {
    scid: Scid,
    tunid: Vec<Unid>,
    cfunid: Unid,
    ocpunid: Vec<Unid>,
    /// Device-declared output connection point list. When absent the
    /// assembly directory's output order is authoritative.
    out_table: Option<Vec<u16>>,
    /// Volatile: active only during a Propose/Apply TUNID sequence.
    proposed: Vec<Unid>,
}

impl IdentityStore {
    /// Out-of-box identity: no TUNID assigned, nothing owned. Used when NV
    /// restore fails so the device can still reach SelfTestException.
    pub fn defaulted(
        ports: usize,
        out_table: Option<Vec<u16>>,
        assemblies: &Assemblies,
    ) -> Self {
        let ocp_len = out_table.as_ref().map_or(assemblies.out_count(), Vec::len);
        IdentityStore {
            scid: Scid::ZERO,
            tunid: vec![Unid::UNSET; ports],
            cfunid: Unid::ZERO,
            ocpunid: vec![Unid::ZERO; ocp_len],
            out_table,
            proposed: vec![Unid::UNSET; ports],
        }
    }

    /// Restore all persistent attributes. Any restore failure is reported
    /// and turns the power-up self test into a failure.
    pub fn restore(
        ports: usize,
        out_table: Option<Vec<u16>>,
        assemblies: &Assemblies,
        sapl: &mut dyn SafetyApp,
    ) -> Result<Self, ErrorCode> {
        let ocp_len = out_table.as_ref().map_or(assemblies.out_count(), Vec::len);

        let mut cfunid_buf = [0u8; Unid::SIZE];
        if !sapl.nv_restore(NvSlot::Cfunid, &mut cfunid_buf) {
            sapl.error_report(ErrorCode::NvRestoreCfunid, 0, 0);
            return Err(ErrorCode::NvRestoreCfunid);
        }

        let mut scid_buf = [0u8; Scid::SIZE];
        if !sapl.nv_restore(NvSlot::Scid, &mut scid_buf) {
            sapl.error_report(ErrorCode::NvRestoreScid, 0, 0);
            return Err(ErrorCode::NvRestoreScid);
        }

        // Factory image: no TUNID assigned. NV layers that have nothing
        // stored leave the buffer untouched.
        let mut tunid_buf = vec![0xFFu8; ports * Unid::SIZE];
        if !sapl.nv_restore(NvSlot::TunidList, &mut tunid_buf) {
            sapl.error_report(ErrorCode::NvRestoreTunid, 0, 0);
            return Err(ErrorCode::NvRestoreTunid);
        }

        let mut ocp_buf = vec![0u8; ocp_len * Unid::SIZE];
        if ocp_len > 0 && !sapl.nv_restore(NvSlot::OcpunidTable, &mut ocp_buf) {
            sapl.error_report(ErrorCode::NvRestoreOcpunid, 0, 0);
            return Err(ErrorCode::NvRestoreOcpunid);
        }

        let store = IdentityStore {
            scid: Scid::from_bytes(&scid_buf).unwrap_or(Scid::ZERO),
            tunid: unid_list_from_bytes(&tunid_buf, ports),
            cfunid: Unid::from_bytes(&cfunid_buf).unwrap_or(Unid::ZERO),
            ocpunid: unid_list_from_bytes(&ocp_buf, ocp_len),
            out_table,
            proposed: vec![Unid::UNSET; ports],
        };
        debug!(
            "identity restored: scid_zero={} tunid_ports={} ocpunids={}",
            store.scid.is_zero(),
            store.tunid.len(),
            store.ocpunid.len()
        );
        Ok(store)
    }

    pub fn scid(&self) -> Scid {
        self.scid
    }

    pub fn scid_is_zero(&self) -> bool {
        self.scid.is_zero()
    }

    pub fn scid_set(&mut self, scid: Scid, sapl: &mut dyn SafetyApp) -> Result<(), ErrorCode> {
        if !sapl.nv_store(NvSlot::Scid, &scid.to_bytes()) {
            sapl.error_report(ErrorCode::NvStoreScid, 0, 0);
            return Err(ErrorCode::NvStoreScid);
        }
        self.scid = scid;
        Ok(())
    }

    pub fn tunid_list(&self) -> &[Unid] {
        &self.tunid
    }

    pub fn tunid_list_set(
        &mut self,
        list: &[Unid],
        sapl: &mut dyn SafetyApp,
    ) -> Result<(), ErrorCode> {
        debug_assert_eq!(list.len(), self.tunid.len());
        if !sapl.nv_store(NvSlot::TunidList, &unid_list_to_bytes(list)) {
            sapl.error_report(ErrorCode::NvStoreTunid, 0, 0);
            return Err(ErrorCode::NvStoreTunid);
        }
        self.tunid.copy_from_slice(list);
        Ok(())
    }

    pub fn cfunid(&self) -> Unid {
        self.cfunid
    }

    pub fn cfunid_set(&mut self, unid: Unid, sapl: &mut dyn SafetyApp) -> Result<(), ErrorCode> {
        if !sapl.nv_store(NvSlot::Cfunid, &unid.to_bytes()) {
            sapl.error_report(ErrorCode::NvStoreCfunid, 0, 0);
            return Err(ErrorCode::NvStoreCfunid);
        }
        self.cfunid = unid;
        Ok(())
    }

    /// Index of an output connection point in the OCPUNID table.
    fn ocp_index(&self, cnxn_point: u16, assemblies: &Assemblies) -> Option<usize> {
        match &self.out_table {
            Some(table) => table.iter().position(|&inst| inst == cnxn_point),
            None => assemblies.out_index_from_instance(cnxn_point),
        }
    }

    pub fn ocpunid_get(
        &self,
        cnxn_point: u16,
        assemblies: &Assemblies,
        sapl: &mut dyn SafetyApp,
    ) -> Result<Unid, ErrorCode> {
        match self.ocp_index(cnxn_point, assemblies) {
            Some(idx) => Ok(self.ocpunid[idx]),
            None => {
                sapl.error_report(ErrorCode::AsmNotFoundGet, cnxn_point, 0);
                Err(ErrorCode::AsmNotFoundGet)
            }
        }
    }

    pub fn ocpunid_set(
        &mut self,
        cnxn_point: u16,
        unid: Unid,
        assemblies: &Assemblies,
        sapl: &mut dyn SafetyApp,
    ) -> Result<(), ErrorCode> {
        let idx = match self.ocp_index(cnxn_point, assemblies) {
            Some(idx) => idx,
            None => {
                sapl.error_report(ErrorCode::AsmNotFoundSet, cnxn_point, 0);
                return Err(ErrorCode::AsmNotFoundSet);
            }
        };
        if self.ocpunid[idx] == unid {
            return Ok(());
        }
        // Stage the new entry, persist the whole table, roll back on failure.
        let previous = self.ocpunid[idx];
        self.ocpunid[idx] = unid;
        if !sapl.nv_store(NvSlot::OcpunidTable, &unid_list_to_bytes(&self.ocpunid)) {
            self.ocpunid[idx] = previous;
            sapl.error_report(ErrorCode::NvStoreOcpunid, cnxn_point, 0);
            return Err(ErrorCode::NvStoreOcpunid);
        }
        Ok(())
    }

    /// OCPUNID table entries paired with their connection point, for the
    /// supervisor object attribute.
    pub fn ocpunid_entries(&self, assemblies: &Assemblies) -> Vec<(u16, Unid)> {
        let instances = match &self.out_table {
            Some(table) => table.clone(),
            None => assemblies.out_instances(),
        };
        instances.into_iter().zip(self.ocpunid.iter().copied()).collect()
    }

    pub fn proposed(&self) -> &[Unid] {
        &self.proposed
    }

    pub fn proposed_set(&mut self, list: &[Unid]) {
        debug_assert_eq!(list.len(), self.proposed.len());
        self.proposed.copy_from_slice(list);
    }

    pub fn proposed_reset(&mut self) {
        self.proposed.fill(Unid::UNSET);
    }

    /// Publish each port's Safety Network Number to the transport.
    pub fn send_snn(
        &self,
        transport: &mut dyn Transport,
        sapl: &mut dyn SafetyApp,
    ) -> Result<(), ErrorCode> {
        for (port, tunid) in self.tunid.iter().enumerate() {
            let mut data = Vec::with_capacity(6);
            data.extend_from_slice(&tunid.snn.time.to_le_bytes());
            data.extend_from_slice(&tunid.snn.date.to_le_bytes());
            if !transport.put(Message::new(Command::Snn, port as u32, data)) {
                sapl.error_report(ErrorCode::SnnSendFailed, port as u16, 0);
                return Err(ErrorCode::SnnSendFailed);
            }
        }
        Ok(())
    }
}

fn unid_list_to_bytes(list: &[Unid]) -> Vec<u8> {
    let mut out = Vec::with_capacity(list.len() * Unid::SIZE);
    for u in list {
        out.extend_from_slice(&u.to_bytes());
    }
    out
}

fn unid_list_from_bytes(bytes: &[u8], count: usize) -> Vec<Unid> {
    (0..count)
        .map(|i| Unid::from_bytes(&bytes[i * Unid::SIZE..]).unwrap_or(Unid::ZERO))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{AsmEntry, AsmKind};
    use crate::testutil::MockApp;
    use crate::types::Snn;

    fn assemblies() -> Assemblies {
        Assemblies::new(vec![
            AsmEntry { instance: 100, kind: AsmKind::Input },
            AsmEntry { instance: 101, kind: AsmKind::Output },
            AsmEntry { instance: 102, kind: AsmKind::Output },
        ])
        .unwrap()
    }

    fn unid(node: u32) -> Unid {
        Unid { snn: Snn { time: 1, date: 2 }, node_id: node }
    }

    #[test]
    fn restore_defaults_to_factory_identity() {
        let asm = assemblies();
        let mut app = MockApp::new();
        let ids = IdentityStore::restore(1, None, &asm, &mut app).unwrap();
        assert!(ids.scid_is_zero());
        assert!(ids.cfunid().is_zero());
        // Out of the box no TUNID is assigned.
        assert_eq!(ids.tunid_list(), &[Unid::UNSET]);
        assert_eq!(ids.proposed(), &[Unid::UNSET]);
    }

    #[test]
    fn restore_failure_is_reported() {
        let asm = assemblies();
        let mut app = MockApp::new();
        app.fail_restore = Some(NvSlot::TunidList);
        let err = IdentityStore::restore(1, None, &asm, &mut app).unwrap_err();
        assert_eq!(err, ErrorCode::NvRestoreTunid);
        assert!(app.reported.contains(&ErrorCode::NvRestoreTunid));
    }

    #[test]
    fn setters_write_through_before_updating_memory() {
        let asm = assemblies();
        let mut app = MockApp::new();
        let mut ids = IdentityStore::restore(1, None, &asm, &mut app).unwrap();

        let scid = Scid { sccrc: 0xAABB, scts: Snn { time: 3, date: 4 } };
        ids.scid_set(scid, &mut app).unwrap();
        assert_eq!(ids.scid(), scid);
        assert_eq!(app.nv[&NvSlot::Scid], scid.to_bytes().to_vec());

        app.fail_store = Some(NvSlot::Scid);
        assert!(ids.scid_set(Scid::ZERO, &mut app).is_err());
        // Memory keeps the previous value after a failed store.
        assert_eq!(ids.scid(), scid);
    }

    #[test]
    fn ocpunid_lookup_uses_assembly_outputs() {
        let asm = assemblies();
        let mut app = MockApp::new();
        let mut ids = IdentityStore::restore(1, None, &asm, &mut app).unwrap();

        assert_eq!(ids.ocpunid_get(101, &asm, &mut app).unwrap(), Unid::ZERO);
        assert!(ids.ocpunid_get(100, &asm, &mut app).is_err());
        assert!(ids.ocpunid_get(999, &asm, &mut app).is_err());

        ids.ocpunid_set(102, unid(9), &asm, &mut app).unwrap();
        assert_eq!(ids.ocpunid_get(102, &asm, &mut app).unwrap(), unid(9));
        assert_eq!(ids.ocpunid_get(101, &asm, &mut app).unwrap(), Unid::ZERO);
    }

    #[test]
    fn ocpunid_lookup_prefers_declared_table() {
        let asm = assemblies();
        let mut app = MockApp::new();
        let mut ids = IdentityStore::restore(1, Some(vec![102]), &asm, &mut app).unwrap();

        // Only instance 102 is a target output connection point here.
        assert!(ids.ocpunid_get(101, &asm, &mut app).is_err());
        ids.ocpunid_set(102, unid(7), &asm, &mut app).unwrap();
        assert_eq!(ids.ocpunid_get(102, &asm, &mut app).unwrap(), unid(7));
    }

    #[test]
    fn ocpunid_store_failure_rolls_back() {
        let asm = assemblies();
        let mut app = MockApp::new();
        let mut ids = IdentityStore::restore(1, None, &asm, &mut app).unwrap();
        app.fail_store = Some(NvSlot::OcpunidTable);
        assert!(ids.ocpunid_set(101, unid(5), &asm, &mut app).is_err());
        assert_eq!(ids.ocpunid_get(101, &asm, &mut app).unwrap(), Unid::ZERO);
    }

    #[test]
    fn snn_publication_covers_every_port() {
        let asm = assemblies();
        let mut app = MockApp::new();
        let mut ids = IdentityStore::restore(2, None, &asm, &mut app).unwrap();
        ids.tunid = vec![unid(0xA1), unid(0xA2)];

        let mut tx = crate::testutil::MockTransport::new();
        ids.send_snn(&mut tx, &mut app).unwrap();
        assert_eq!(tx.sent.len(), 2);
        assert_eq!(tx.sent[0].cmd, Command::Snn);
        assert_eq!(tx.sent[0].add_info, 0);
        assert_eq!(tx.sent[1].add_info, 1);
        assert_eq!(tx.sent[0].data, vec![1, 0, 0, 0, 2, 0]);
    }
}
