//! Fake collaborators for unit tests.
//!
//! - [`FakeNic`]: RTL8169 register file (TPPOLL.FSWINT raises ISR.SWINT)
//! - [`FakeTraps`]: trap bookkeeping and register mappings onto a `FakeNic`
//! - [`FakeMemory`]: flat guest RAM starting at physical 0
//! - [`FakeVpn`]: records frames, optionally echoes guest frames back
//! - [`Rig`]: all of the above wired to an [`Rtl8169Vpn`]

use std::alloc::{alloc_zeroed, Layout};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::vec::Vec;

use dma_pool::{DmaPool, PAGE_SIZE};
use smoltcp::wire::{IpProtocol, Ipv4Address};
use spin::Mutex;

use crate::config::ShimConfig;
use crate::device::registers::descriptor::{EOR, OWN, SIZE};
use crate::device::registers::realtek::{
    CR, ISR, ISR_SWINT, PCI_BAR_COUNT, RCR, RDSAR, THPDS, TNPDS, TPPOLL, TPPOLL_FSWINT,
};
use crate::driver::realtek::desc::Descriptor;
use crate::driver::realtek::{BarConfig, NicFunctions, Platform, Rtl8169Vpn, VpnClient, VpnHandle};
use crate::hv::{
    AccessWidth, DeviceId, MapError, PhysMemory, RegisterMapping, TrapError, TrapHandle, TrapHost,
    TrapTarget,
};

// ═══════════════════════════════════════════════════════════════════════════
// DMA PAGES
// ═══════════════════════════════════════════════════════════════════════════

/// Pool over a leaked, page-aligned arena. Bus address == CPU address.
pub fn page_pool(pages: usize) -> DmaPool {
    let size = pages * PAGE_SIZE;
    let layout = Layout::from_size_align(size, PAGE_SIZE).unwrap();
    // SAFETY: non-zero size; the arena is never freed.
    unsafe {
        let base = alloc_zeroed(layout);
        assert!(!base.is_null());
        DmaPool::new(base, base as u64, size)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// NIC REGISTER FILE
// ═══════════════════════════════════════════════════════════════════════════

const REG_FILE_LEN: usize = 4096;

struct NicRegs {
    bytes: Vec<u8>,
    tppoll: Vec<u8>,
}

/// Register file standing in for the chip.
pub struct FakeNic {
    regs: Mutex<NicRegs>,
}

impl FakeNic {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            regs: Mutex::new(NicRegs {
                bytes: vec![0; REG_FILE_LEN],
                tppoll: Vec::new(),
            }),
        })
    }

    pub fn set_mac(&self, mac: [u8; 6]) {
        self.regs.lock().bytes[..6].copy_from_slice(&mac);
    }

    fn load(&self, offset: u64, len: usize) -> u64 {
        let regs = self.regs.lock();
        let mut v = [0u8; 8];
        v[..len].copy_from_slice(&regs.bytes[offset as usize..offset as usize + len]);
        u64::from_le_bytes(v)
    }

    fn store(&self, offset: u64, len: usize, value: u64) {
        let mut regs = self.regs.lock();
        regs.bytes[offset as usize..offset as usize + len]
            .copy_from_slice(&value.to_le_bytes()[..len]);
    }

    pub fn get8(&self, offset: u64) -> u8 {
        self.load(offset, 1) as u8
    }

    pub fn get16(&self, offset: u64) -> u16 {
        self.load(offset, 2) as u16
    }

    pub fn get32(&self, offset: u64) -> u32 {
        self.load(offset, 4) as u32
    }

    pub fn get64(&self, offset: u64) -> u64 {
        self.load(offset, 8)
    }

    pub fn set16(&self, offset: u64, value: u16) {
        self.store(offset, 2, value as u64);
    }

    /// Byte writes to TPPOLL seen so far.
    pub fn tppoll_writes(&self) -> Vec<u8> {
        self.regs.lock().tppoll.clone()
    }

    pub fn clear_tppoll(&self) {
        self.regs.lock().tppoll.clear();
    }

    fn write(&self, offset: u64, width: AccessWidth, value: u32) {
        if offset == TPPOLL && width == AccessWidth::Byte {
            // self-clearing; FSWINT shows up in ISR
            self.regs.lock().tppoll.push(value as u8);
            if value as u8 & TPPOLL_FSWINT != 0 {
                let isr = self.get16(ISR) | ISR_SWINT;
                self.set16(ISR, isr);
            }
            return;
        }
        self.store(offset, width.bytes(), value as u64);
    }
}

struct FakeMapping {
    nic: Arc<FakeNic>,
    len: u64,
}

impl RegisterMapping for FakeMapping {
    fn len(&self) -> u64 {
        self.len
    }

    fn read(&self, offset: u64, width: AccessWidth) -> u32 {
        self.nic.load(offset, width.bytes()) as u32
    }

    fn write(&self, offset: u64, width: AccessWidth, value: u32) {
        self.nic.write(offset, width, value);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TRAPS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    Port,
    Mmio,
}

struct Installed {
    handle: TrapHandle,
    kind: TrapKind,
    base: u64,
    len: u64,
    slot: usize,
}

pub struct FakeTraps {
    nic: Arc<FakeNic>,
    installed: Mutex<Vec<Installed>>,
    next: AtomicU64,
    fail_map: AtomicBool,
    fail_trap: AtomicBool,
}

impl FakeTraps {
    pub fn new(nic: Arc<FakeNic>) -> Arc<Self> {
        Arc::new(Self {
            nic,
            installed: Mutex::new(Vec::new()),
            next: AtomicU64::new(1),
            fail_map: AtomicBool::new(false),
            fail_trap: AtomicBool::new(false),
        })
    }

    /// `(kind, base, len, slot)` of every installed trap.
    pub fn active(&self) -> Vec<(TrapKind, u64, u64, usize)> {
        self.installed
            .lock()
            .iter()
            .map(|t| (t.kind, t.base, t.len, t.slot))
            .collect()
    }

    pub fn fail_mapping(&self, fail: bool) {
        self.fail_map.store(fail, Ordering::SeqCst);
    }

    pub fn fail_traps(&self, fail: bool) {
        self.fail_trap.store(fail, Ordering::SeqCst);
    }

    fn install(
        &self,
        kind: TrapKind,
        base: u64,
        len: u64,
        target: TrapTarget,
    ) -> Result<TrapHandle, TrapError> {
        if self.fail_trap.load(Ordering::SeqCst) {
            return Err(TrapError { base, len });
        }
        let handle = TrapHandle(self.next.fetch_add(1, Ordering::SeqCst));
        self.installed.lock().push(Installed {
            handle,
            kind,
            base,
            len,
            slot: target.slot,
        });
        Ok(handle)
    }

    fn remove(&self, handle: TrapHandle, kind: TrapKind) {
        let mut installed = self.installed.lock();
        let before = installed.len();
        installed.retain(|t| !(t.handle == handle && t.kind == kind));
        assert_eq!(installed.len() + 1, before, "unknown trap {:?}", handle);
    }
}

impl TrapHost for FakeTraps {
    fn map_registers(&self, base: u64, len: u64) -> Result<Box<dyn RegisterMapping>, MapError> {
        if self.fail_map.load(Ordering::SeqCst) {
            return Err(MapError { addr: base, len });
        }
        Ok(Box::new(FakeMapping {
            nic: Arc::clone(&self.nic),
            len: len.min(REG_FILE_LEN as u64),
        }))
    }

    fn register_mmio(
        &self,
        base: u64,
        len: u64,
        target: TrapTarget,
    ) -> Result<TrapHandle, TrapError> {
        self.install(TrapKind::Mmio, base, len, target)
    }

    fn register_pio(
        &self,
        base: u16,
        len: u16,
        target: TrapTarget,
    ) -> Result<TrapHandle, TrapError> {
        self.install(TrapKind::Port, base as u64, len as u64, target)
    }

    fn unregister_mmio(&self, handle: TrapHandle) {
        self.remove(handle, TrapKind::Mmio);
    }

    fn unregister_pio(&self, handle: TrapHandle) {
        self.remove(handle, TrapKind::Port);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// GUEST MEMORY
// ═══════════════════════════════════════════════════════════════════════════

pub struct FakeMemory {
    ram: Mutex<Vec<u8>>,
}

impl FakeMemory {
    pub fn new(size: usize) -> Self {
        Self {
            ram: Mutex::new(vec![0; size]),
        }
    }

    pub fn poke(&self, addr: u64, data: &[u8]) {
        self.write(addr, data).unwrap();
    }

    pub fn peek(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0; len];
        self.read(addr, &mut out).unwrap();
        out
    }

    pub fn write_desc(&self, addr: u64, desc: &Descriptor) {
        self.poke(addr, &desc.to_bytes());
    }

    pub fn read_desc(&self, addr: u64) -> Descriptor {
        let mut raw = [0u8; SIZE];
        self.read(addr, &mut raw).unwrap();
        Descriptor::from_bytes(&raw)
    }

    fn range(&self, addr: u64, len: usize, ram_len: usize) -> Result<core::ops::Range<usize>, MapError> {
        let start = addr as usize;
        match start.checked_add(len) {
            Some(end) if end <= ram_len => Ok(start..end),
            _ => Err(MapError {
                addr,
                len: len as u64,
            }),
        }
    }
}

impl PhysMemory for FakeMemory {
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MapError> {
        let ram = self.ram.lock();
        let r = self.range(addr, buf.len(), ram.len())?;
        buf.copy_from_slice(&ram[r]);
        Ok(())
    }

    fn write(&self, addr: u64, data: &[u8]) -> Result<(), MapError> {
        let mut ram = self.ram.lock();
        let r = self.range(addr, data.len(), ram.len())?;
        ram[r].copy_from_slice(data);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// VPN CLIENT
// ═══════════════════════════════════════════════════════════════════════════

pub struct FakeVpn {
    nic: Mutex<Option<Arc<dyn NicFunctions>>>,
    refuse: AtomicBool,
    echo: Arc<AtomicBool>,
    registrations: AtomicUsize,
    from_guest: Arc<Mutex<Vec<Vec<u8>>>>,
    from_wire: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FakeVpn {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nic: Mutex::new(None),
            refuse: AtomicBool::new(false),
            echo: Arc::new(AtomicBool::new(false)),
            registrations: AtomicUsize::new(0),
            from_guest: Arc::new(Mutex::new(Vec::new())),
            from_wire: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// The capability handed over at attachment.
    pub fn nic(&self) -> Arc<dyn NicFunctions> {
        self.nic.lock().clone().expect("NIC not attached")
    }

    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Send every guest frame straight back into the guest.
    pub fn echo_guest_frames(&self, echo: bool) {
        self.echo.store(echo, Ordering::SeqCst);
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn from_guest(&self) -> Vec<Vec<u8>> {
        self.from_guest.lock().clone()
    }

    pub fn from_wire(&self) -> Vec<Vec<u8>> {
        self.from_wire.lock().clone()
    }
}

impl VpnClient for FakeVpn {
    fn new_nic(&self, nic: Arc<dyn NicFunctions>) -> Option<VpnHandle> {
        // Registration from inside new_nic must not deadlock.
        let _ = nic.physical_nic_info();

        let sink = Arc::clone(&self.from_guest);
        let echo = Arc::clone(&self.echo);
        let back = Arc::clone(&nic);
        nic.set_virtual_nic_recv_callback(Arc::new(move |frames: &[&[u8]]| {
            sink.lock().extend(frames.iter().map(|f| f.to_vec()));
            if echo.load(Ordering::SeqCst) {
                back.send_virtual_nic(frames);
            }
        }));

        let sink = Arc::clone(&self.from_wire);
        nic.set_physical_nic_recv_callback(Arc::new(move |frames: &[&[u8]]| {
            sink.lock().extend(frames.iter().map(|f| f.to_vec()));
        }));

        // A refusing client still gets to register callbacks first.
        *self.nic.lock() = Some(nic);
        if self.refuse.load(Ordering::SeqCst) {
            return None;
        }
        let n = self.registrations.fetch_add(1, Ordering::SeqCst) + 1;
        Some(VpnHandle(n as u64))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FRAMES
// ═══════════════════════════════════════════════════════════════════════════

pub const IP_SRC: Ipv4Address = Ipv4Address::new(10, 8, 0, 2);
pub const IP_DST: Ipv4Address = Ipv4Address::new(10, 8, 0, 1);

/// Ethernet + IPv4 (valid header checksum) + UDP or TCP header + payload.
/// The transport checksum field is left zero.
pub fn ipv4_frame(proto: IpProtocol, payload: &[u8]) -> Vec<u8> {
    let l4_header = match proto {
        IpProtocol::Tcp => 20,
        _ => 8,
    };
    let total = 20 + l4_header + payload.len();

    let mut f = Vec::with_capacity(14 + total);
    f.extend_from_slice(&[0x02, 0, 0, 0, 0, 1, 0x52, 0x54, 0, 0xAB, 0xCD, 0xEF, 0x08, 0x00]);

    let mut ip = [0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&(total as u16).to_be_bytes());
    ip[8] = 64;
    ip[9] = u8::from(proto);
    ip[12..16].copy_from_slice(IP_SRC.as_bytes());
    ip[16..20].copy_from_slice(IP_DST.as_bytes());
    let csum = !fold_sum(&ip, 0);
    ip[10..12].copy_from_slice(&csum.to_be_bytes());
    f.extend_from_slice(&ip);

    match proto {
        IpProtocol::Tcp => {
            let mut tcp = [0u8; 20];
            tcp[0..2].copy_from_slice(&40000u16.to_be_bytes());
            tcp[2..4].copy_from_slice(&443u16.to_be_bytes());
            tcp[12] = 5 << 4;
            tcp[13] = 0x18;
            tcp[14..16].copy_from_slice(&1024u16.to_be_bytes());
            f.extend_from_slice(&tcp);
        }
        _ => {
            let mut udp = [0u8; 8];
            udp[0..2].copy_from_slice(&51820u16.to_be_bytes());
            udp[2..4].copy_from_slice(&51820u16.to_be_bytes());
            udp[4..6].copy_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
            f.extend_from_slice(&udp);
        }
    }
    f.extend_from_slice(payload);
    f
}

/// Folded (not complemented) pseudo-header sum, as a driver would pre-seed
/// the transport checksum field.
pub fn pseudo_header_sum(proto: IpProtocol, l4_len: usize) -> u16 {
    let mut ph = Vec::with_capacity(12);
    ph.extend_from_slice(IP_SRC.as_bytes());
    ph.extend_from_slice(IP_DST.as_bytes());
    ph.extend_from_slice(&[0, u8::from(proto)]);
    ph.extend_from_slice(&(l4_len as u16).to_be_bytes());
    fold_sum(&ph, 0)
}

fn fold_sum(data: &[u8], mut sum: u32) -> u16 {
    for w in data.chunks(2) {
        let hi = w[0] as u32;
        let lo = w.get(1).copied().unwrap_or(0) as u32;
        sum += (hi << 8) | lo;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

// ═══════════════════════════════════════════════════════════════════════════
// RIG
// ═══════════════════════════════════════════════════════════════════════════

pub const MMIO_BASE: u64 = 0xFEB0_0000;
pub const TEST_MAC: [u8; 6] = [0x52, 0x54, 0x00, 0xAB, 0xCD, 0xEF];

pub const GUEST_TX_RING: u64 = 0x1_0000;
pub const GUEST_TX_RING_HI: u64 = 0x2_0000;
pub const GUEST_RX_RING: u64 = 0x3_0000;
const GUEST_RX_BUFS: u64 = 0x4_0000;
const GUEST_RX_SLOTS: usize = 16;
const GUEST_RAM: usize = 0x10_0000;

/// An `Rtl8169Vpn` with a port BAR in slot 0 and a memory BAR in slot 2.
pub struct Rig {
    pub nic: Rtl8169Vpn,
    pub regs: Arc<FakeNic>,
    pub traps: Arc<FakeTraps>,
    pub memory: Arc<FakeMemory>,
    pub vpn: Arc<FakeVpn>,
}

impl Rig {
    pub fn new(config: ShimConfig) -> Self {
        let regs = FakeNic::new();
        regs.set_mac(TEST_MAC);
        let traps = FakeTraps::new(Arc::clone(&regs));
        let memory = Arc::new(FakeMemory::new(GUEST_RAM));
        let vpn = FakeVpn::new();
        let platform = Platform {
            traps: traps.clone(),
            memory: memory.clone(),
            vpn: vpn.clone(),
        };

        let mut bars = [BarConfig::default(); PCI_BAR_COUNT];
        bars[0] = BarConfig::new(0x0000_C001, 0xFFFF_FF01);
        bars[2] = BarConfig::new(MMIO_BASE as u32, 0xFFFF_FF00);

        let pool = page_pool(800);
        let nic = Rtl8169Vpn::new(DeviceId(1), config, platform, &pool, bars).unwrap();
        Self {
            nic,
            regs,
            traps,
            memory,
            vpn,
        }
    }

    /// Reset, rings programmed, VPN attached; TPPOLL log cleared.
    pub fn attached(config: ShimConfig) -> Self {
        let rig = Self::new(config);
        rig.write(CR, 1, 0x0C);
        rig.program_rings();
        rig.write32(RCR, 0x0000_E70F);
        assert!(rig.nic.is_attached());
        rig.regs.clear_tppoll();
        rig
    }

    /// Lay out a guest RX ring and program all three descriptor bases.
    pub fn program_rings(&self) {
        for i in 0..GUEST_RX_SLOTS {
            let mut opts = OWN | 0x600;
            if i == GUEST_RX_SLOTS - 1 {
                opts |= EOR;
            }
            self.memory.write_desc(
                GUEST_RX_RING + (i * SIZE) as u64,
                &Descriptor::new(opts, GUEST_RX_BUFS + (i as u64) * 0x800),
            );
        }
        for (reg, base) in [
            (TNPDS, GUEST_TX_RING),
            (THPDS, GUEST_TX_RING_HI),
            (RDSAR, GUEST_RX_RING),
        ] {
            self.write32(reg, base as u32);
            self.write32(reg + 4, (base >> 32) as u32);
        }
    }

    /// Guest TX descriptor `i` of `ring` pointing at a buffer holding `data`.
    pub fn post_guest_tx(&self, ring: u64, i: usize, opts: u32, data: &[u8]) {
        let buf = ring + 0x1000 + (i as u64) * 0x800;
        self.memory.poke(buf, data);
        self.memory.write_desc(
            ring + (i * SIZE) as u64,
            &Descriptor::new(opts | data.len() as u32, buf),
        );
    }

    pub fn write(&self, offset: u64, len: usize, value: u32) {
        let mut buf = value.to_le_bytes();
        self.nic.handle_mmio(2, MMIO_BASE + offset, true, &mut buf[..len]);
    }

    pub fn write32(&self, offset: u64, value: u32) {
        self.write(offset, 4, value);
    }

    pub fn read(&self, offset: u64, len: usize) -> u32 {
        let mut buf = [0u8; 4];
        self.nic.handle_mmio(2, MMIO_BASE + offset, false, &mut buf[..len]);
        u32::from_le_bytes(buf)
    }

    pub fn shadow_ring_base(&self, reg: u64) -> u64 {
        self.nic.shadow_ring_base(reg)
    }

    pub fn shadow_tx(&self, i: usize) -> Descriptor {
        self.nic.shadow_tx(i)
    }

    pub fn shadow_rx(&self, i: usize) -> Descriptor {
        self.nic.shadow_rx(i)
    }

    pub fn hw_receive(&self, i: usize, frame: &[u8]) {
        self.nic.hw_receive(i, frame);
    }
}
