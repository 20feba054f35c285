// This file is part of cadmium.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::rc::Rc;

use cadmium_core::factory::{
    AudioOutput, Bus68000, BusZ80, Cartridge, CdImage, Controllers, Cpu68000, CpuZ80, SystemModel,
    VideoOutput,
};
use cadmium_core::util::{new_shared, Shared};
use cadmium_system::system::{ChipConstants, Config, MegaDrive};

struct MockCpu68000 {
    pc: u32,
    data_registers: [u32; 8],
    address_registers: [u32; 8],
    status_register: u16,
    fetched: Vec<u16>,
    instructions_done: u32,
}

impl MockCpu68000 {
    fn new() -> Self {
        MockCpu68000 {
            pc: 0,
            data_registers: [0; 8],
            address_registers: [0; 8],
            status_register: 0,
            fetched: Vec::new(),
            instructions_done: 0,
        }
    }
}

impl Cpu68000 for MockCpu68000 {
    fn do_cycle(&mut self, bus: &mut dyn Bus68000) -> u32 {
        let opcode = bus.read(self.pc / 2, true, true);
        self.fetched.push(opcode);
        self.instructions_done += 1;
        if opcode == 0x4e75 {
            // Pretend the RTS went back to address 0.
            self.pc = 0;
        } else {
            self.pc = self.pc.wrapping_add(2);
        }
        10
    }

    fn reset(&mut self, _bus: &mut dyn Bus68000) {}

    fn interrupt(&mut self, _bus: &mut dyn Bus68000, _level: u8) {}

    fn get_data_register(&self, index: usize) -> u32 {
        self.data_registers[index]
    }

    fn set_data_register(&mut self, index: usize, value: u32) {
        self.data_registers[index] = value;
    }

    fn get_address_register(&self, index: usize) -> u32 {
        self.address_registers[index]
    }

    fn set_address_register(&mut self, index: usize, value: u32) {
        self.address_registers[index] = value;
    }

    fn get_status_register(&self) -> u16 {
        self.status_register
    }

    fn set_status_register(&mut self, value: u16) {
        self.status_register = value;
    }

    fn get_pc(&self) -> u32 {
        self.pc
    }
}

struct MockCpuZ80 {
    instructions_done: u32,
}

impl MockCpuZ80 {
    fn new() -> Self {
        MockCpuZ80 {
            instructions_done: 0,
        }
    }
}

impl CpuZ80 for MockCpuZ80 {
    fn do_cycle(&mut self, _bus: &mut dyn BusZ80) -> u32 {
        self.instructions_done += 1;
        4
    }

    fn reset(&mut self) {}

    fn interrupt(&mut self, _bus: &mut dyn BusZ80) {}

    fn get_pc(&self) -> u16 {
        0
    }
}

struct NullCartridge;

impl Cartridge for NullCartridge {
    fn read(&mut self, _address: u32) -> u8 {
        0
    }

    fn write(&mut self, _address: u32, _value: u8) {}
}

struct NullControllers;

impl Controllers for NullControllers {
    fn read(&mut self, _port: usize) -> u8 {
        0xff
    }

    fn write(&mut self, _port: usize, _value: u8) {}
}

struct MockVideo {
    colours: Vec<(usize, u16)>,
    scanlines_rendered: usize,
}

impl MockVideo {
    fn new() -> Self {
        MockVideo {
            colours: Vec::new(),
            scanlines_rendered: 0,
        }
    }
}

impl VideoOutput for MockVideo {
    fn colour_updated(&mut self, index: usize, colour: u16) {
        self.colours.push((index, colour));
    }

    fn scanline_rendered(
        &mut self,
        _scanline: usize,
        _pixels: &[u8],
        _width: usize,
        _height: usize,
    ) {
        self.scanlines_rendered += 1;
    }
}

struct MockAudio {
    fm_samples: Vec<i16>,
    psg_samples: Vec<i16>,
    pcm_samples: Vec<i16>,
    cdda_samples: Vec<i16>,
}

impl MockAudio {
    fn new() -> Self {
        MockAudio {
            fm_samples: Vec::new(),
            psg_samples: Vec::new(),
            pcm_samples: Vec::new(),
            cdda_samples: Vec::new(),
        }
    }
}

impl AudioOutput for MockAudio {
    fn fm_audio_to_be_generated(&mut self, total_frames: usize, generate: &mut dyn FnMut(&mut [i16])) {
        let mut buffer = vec![0i16; total_frames * 2];
        generate(&mut buffer);
        self.fm_samples.extend_from_slice(&buffer);
    }

    fn psg_audio_to_be_generated(&mut self, total_frames: usize, generate: &mut dyn FnMut(&mut [i16])) {
        let mut buffer = vec![0i16; total_frames];
        generate(&mut buffer);
        self.psg_samples.extend_from_slice(&buffer);
    }

    fn pcm_audio_to_be_generated(&mut self, total_frames: usize, generate: &mut dyn FnMut(&mut [i16])) {
        let mut buffer = vec![0i16; total_frames * 2];
        generate(&mut buffer);
        self.pcm_samples.extend_from_slice(&buffer);
    }

    fn cdda_audio_to_be_generated(&mut self, total_frames: usize, generate: &mut dyn FnMut(&mut [i16])) {
        let mut buffer = vec![0i16; total_frames * 2];
        generate(&mut buffer);
        self.cdda_samples.extend_from_slice(&buffer);
    }
}

struct NullCd;

impl CdImage for NullCd {
    fn sector_read(&mut self) -> [u8; 2048] {
        [0; 2048]
    }

    fn seeked(&mut self, _sector: u32) {}

    fn track_seeked(&mut self, _track: u16) {}

    fn audio_read(&mut self, _buffer: &mut [i16]) -> usize {
        0
    }
}

struct Harness {
    machine: MegaDrive,
    m68k: Shared<MockCpu68000>,
    z80: Shared<MockCpuZ80>,
    sub: Shared<MockCpu68000>,
    video: Shared<MockVideo>,
    audio: Shared<MockAudio>,
}

fn setup_machine() -> Harness {
    setup_machine_with_config(Config::new(SystemModel::from("ntsc")))
}

fn setup_machine_with_config(config: Config) -> Harness {
    let m68k = new_shared(MockCpu68000::new());
    let z80 = new_shared(MockCpuZ80::new());
    let sub = new_shared(MockCpu68000::new());
    let video = new_shared(MockVideo::new());
    let audio = new_shared(MockAudio::new());

    let m68k_dyn: Shared<dyn Cpu68000> = m68k.clone();
    let z80_dyn: Shared<dyn CpuZ80> = z80.clone();
    let sub_dyn: Shared<dyn Cpu68000> = sub.clone();
    let video_dyn: Shared<dyn VideoOutput> = video.clone();
    let audio_dyn: Shared<dyn AudioOutput> = audio.clone();

    let machine = MegaDrive::build(
        Rc::new(config),
        &ChipConstants::new(),
        m68k_dyn,
        z80_dyn,
        sub_dyn,
        new_shared(NullCartridge),
        new_shared(NullControllers),
        video_dyn,
        audio_dyn,
        new_shared(NullCd),
    );

    Harness {
        machine,
        m68k,
        z80,
        sub,
        video,
        audio,
    }
}

const VDP_DATA: u32 = 0x600000;
const VDP_CONTROL: u32 = 0x600002;
const Z80_BUSREQ: u32 = 0x508880;
const Z80_RESET: u32 = 0x508900;
const SUB_RESET: u32 = 0x509000;
const MEMORY_MODE: u32 = 0x509001;

fn write_vdp_register(machine: &mut MegaDrive, reg: u16, data: u16) {
    machine.m68k_write(VDP_CONTROL, true, true, 0x8000 | (reg << 8) | data);
}

#[test]
fn cram_write_dispatches_three_palette_entries() {
    let mut harness = setup_machine();
    let machine = &mut harness.machine;

    machine.m68k_write(VDP_CONTROL, true, true, 0xc000);
    machine.m68k_write(VDP_CONTROL, true, true, 0x0000);
    machine.m68k_write(VDP_DATA, true, true, 0x0eee);

    assert_eq!(
        vec![(0x00, 0x0fff), (0x40, 0x0777), (0x80, 0x0fff)],
        harness.video.borrow().colours
    );
}

#[test]
fn vram_round_trips_through_the_data_port() {
    let mut harness = setup_machine();
    let machine = &mut harness.machine;

    write_vdp_register(machine, 15, 2);
    machine.m68k_write(VDP_CONTROL, true, true, 0x4100);
    machine.m68k_write(VDP_CONTROL, true, true, 0x0000);
    machine.m68k_write(VDP_DATA, true, true, 0x1234);
    machine.m68k_write(VDP_DATA, true, true, 0x5678);

    machine.m68k_write(VDP_CONTROL, true, true, 0x0100);
    machine.m68k_write(VDP_CONTROL, true, true, 0x0000);
    assert_eq!(0x1234, machine.m68k_read(VDP_DATA, true, true));
    assert_eq!(0x5678, machine.m68k_read(VDP_DATA, true, true));
}

#[test]
fn memory_to_vram_dma_copies_work_ram() {
    let mut harness = setup_machine();
    let machine = &mut harness.machine;

    // Stage two words at the start of work RAM (byte address 0xe00000).
    machine.m68k_write(0x700000, true, true, 0xcafe);
    machine.m68k_write(0x700001, true, true, 0xbabe);

    write_vdp_register(machine, 1, 1 << 4); // DMA enable
    write_vdp_register(machine, 15, 2); // increment 2
    write_vdp_register(machine, 19, 2); // length 2
    write_vdp_register(machine, 21, 0x00); // source low
    write_vdp_register(machine, 22, 0x00); // source mid
    write_vdp_register(machine, 23, 0x70); // source high, memory-to-VRAM

    // Destination 0x0040, VRAM write with the DMA bit set.
    machine.m68k_write(VDP_CONTROL, true, true, 0x4040);
    machine.m68k_write(VDP_CONTROL, true, true, 0x0080);

    machine.m68k_write(VDP_CONTROL, true, true, 0x0040);
    machine.m68k_write(VDP_CONTROL, true, true, 0x0000);
    assert_eq!(0xcafe, machine.m68k_read(VDP_DATA, true, true));
    assert_eq!(0xbabe, machine.m68k_read(VDP_DATA, true, true));
}

#[test]
fn z80_bus_request_handshake() {
    let mut harness = setup_machine();
    let machine = &mut harness.machine;

    // From idle, request the Z80 bus.
    machine.m68k_write(Z80_BUSREQ, true, true, 0x0100);
    assert_eq!(0x0000, machine.m68k_read(Z80_BUSREQ, true, true));

    // Release it again: the Z80 resumes.
    machine.m68k_write(Z80_BUSREQ, true, true, 0x0000);
    assert_eq!(0x0100, machine.m68k_read(Z80_BUSREQ, true, true));
}

#[test]
fn z80_executes_once_reset_is_released() {
    let mut harness = setup_machine();

    harness.machine.m68k_write(Z80_RESET, true, true, 0x0100);
    harness.machine.run_frame();

    assert!(harness.z80.borrow().instructions_done > 0);
}

#[test]
fn z80_window_reaches_work_ram() {
    let mut harness = setup_machine();
    let machine = &mut harness.machine;

    machine.m68k_write(0x700000, true, true, 0xa55a);

    // Shift in bank 0x1c0 (window base 0xe00000), one bit per write.
    for bit in [0u8, 0, 0, 0, 0, 0, 1, 1, 1].iter() {
        machine.z80_write(0x6000, *bit);
    }

    assert_eq!(0xa5, machine.z80_read(0x8000));
    assert_eq!(0x5a, machine.z80_read(0x8001));
}

#[test]
fn version_register_reports_region_and_expansion() {
    let mut harness = setup_machine();
    // Overseas NTSC with a Mega CD attached.
    assert_eq!(0x80, harness.machine.m68k_read(0x508000, false, true));
}

#[test]
fn hv_counter_tracks_current_scanline() {
    let mut harness = setup_machine();
    harness.machine.run_frame();
    let scanline = harness.machine.get_current_scanline();
    assert_eq!(
        (scanline & 0xff) << 8,
        harness.machine.m68k_read(0x600004, true, true)
    );
}

#[test]
fn word_ram_ownership_round_trip() {
    let mut harness = setup_machine();
    let machine = &mut harness.machine;

    // Boot state: the main CPU owns WORD-RAM.
    let mode = machine.m68k_read(MEMORY_MODE, true, true);
    assert_eq!(1, mode & 1); // ret
    assert_eq!(0, mode & 2); // dmna

    // Hand WORD-RAM to the sub CPU.
    machine.m68k_write(MEMORY_MODE, false, true, 1 << 1);
    let mode = machine.m68k_read(MEMORY_MODE, true, true);
    assert_eq!(0, mode & 1);
    assert_eq!(2, mode & 2);

    // The sub CPU sees the same flags and returns the bank.
    let sub_mode = machine.sub_read(0x7fc001, true, true);
    assert_eq!(2, sub_mode & 2);
    machine.sub_write(0x7fc001, false, true, 1);
    let mode = machine.m68k_read(MEMORY_MODE, true, true);
    assert_eq!(1, mode & 1);
    assert_eq!(0, mode & 2);
}

#[test]
fn word_ram_is_shared_between_cpus() {
    let mut harness = setup_machine();
    let machine = &mut harness.machine;

    // Main CPU owns it at boot: write through the main window.
    machine.m68k_write(0x300000, true, true, 0x1357);
    // Hand it over and read from the sub side.
    machine.m68k_write(MEMORY_MODE, false, true, 1 << 1);
    assert_eq!(0x1357, machine.sub_read(0x40000, true, true));
}

#[test]
fn communication_registers_cross_the_bridge() {
    let mut harness = setup_machine();
    let machine = &mut harness.machine;

    machine.m68k_write(0x509008, true, true, 0xbeef);
    assert_eq!(0xbeef, machine.sub_read(0x7fc008, true, true));

    machine.sub_write(0x7fc010, true, true, 0xf00d);
    assert_eq!(0xf00d, machine.m68k_read(0x509010, true, true));

    // Each side owns one byte of the flag.
    machine.m68k_write(0x509007, true, false, 0x1200);
    machine.sub_write(0x7fc007, false, true, 0x0034);
    assert_eq!(0x1234, machine.m68k_read(0x509007, true, true));
}

#[test]
fn fm_dac_substitutes_channel_6() {
    let mut config = Config::new(SystemModel::from("ntsc"));
    for i in 0..5 {
        config.sound.fm_channels_disabled[i] = true;
    }
    let mut harness = setup_machine_with_config(config);

    {
        let machine = &mut harness.machine;
        machine.z80_write(0x4000, 0x2b);
        machine.z80_write(0x4001, 0x80);
        machine.z80_write(0x4000, 0x2a);
        machine.z80_write(0x4001, 0xc0);
        machine.run_frame();
    }

    let audio = harness.audio.borrow();
    assert!(!audio.fm_samples.is_empty());
    for &sample in audio.fm_samples.iter() {
        assert_eq!(0x800, sample);
    }
}

#[test]
fn bram_init_call_is_trapped() {
    let mut harness = setup_machine();

    {
        let mut sub = harness.sub.borrow_mut();
        sub.pc = 0x5f16;
        sub.status_register = 1;
        sub.data_registers[0] = 0x0000;
    }

    let machine = &mut harness.machine;
    // Release the sub CPU from reset so that it runs.
    machine.m68k_write(SUB_RESET, true, true, 0x0001);
    machine.run_frame();

    let sub = harness.sub.borrow();
    assert_eq!(0, sub.status_register & 1);
    assert_eq!(0x100, sub.data_registers[0]);
    assert!(sub.fetched.contains(&0x4e75));
}

#[test]
fn cdc_read_without_buffered_sectors_sets_carry() {
    let mut harness = setup_machine();

    {
        let mut sub = harness.sub.borrow_mut();
        sub.pc = 0x5f22;
        sub.data_registers[0] = 0x8b;
    }

    let machine = &mut harness.machine;
    machine.m68k_write(SUB_RESET, true, true, 0x0001);
    machine.run_frame();

    let sub = harness.sub.borrow();
    assert_eq!(1, sub.status_register & 1);
    assert!(sub.fetched.contains(&0x4e75));
}

#[test]
fn run_frame_renders_every_visible_scanline() {
    let mut harness = setup_machine();
    harness.machine.run_frame();
    assert_eq!(224, harness.video.borrow().scanlines_rendered);
    assert_eq!(1, harness.machine.get_frame_count());
}

#[test]
fn main_cpu_runs_a_frame_of_instructions() {
    let mut harness = setup_machine();
    harness.machine.run_frame();
    // 3420 cycles/scanline * 262 scanlines / (7 * 10) per instruction.
    let expected: u32 = 3420 * 262 / 70;
    let done = harness.m68k.borrow().instructions_done;
    assert!(done >= expected - 1 && done <= expected + 1, "done {}", done);
}
