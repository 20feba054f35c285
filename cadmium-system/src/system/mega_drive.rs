// This file is part of cadmium.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::rc::Rc;

use byteorder::{BigEndian, ByteOrder};

use cadmium_core::factory::{
    AudioOutput, Cartridge, CdImage, Controllers, Cpu68000, CpuZ80, VideoOutput,
};
use cadmium_core::io::IoPort;
use cadmium_core::sound::{Fm, FmConfig, FmOperatorConstant, Pcm, Psg, PsgConfig, PsgConstant};
use cadmium_core::util::Shared;
use cadmium_core::video::{Vdp, VdpConfig, VdpConstant};

use crate::bus::{CycleMegaDrive, MainBus, SubBus, SyncSet, Z80Bus};

use super::config::Config;
use super::mem::{PrgRam, WordRam};

// Design:
//   MegaDrive represents the machine itself: one top-level container
//   owning every device state, with the CPU cores and the front-end's
//   capability objects attached as external collaborators. Devices hold
//   no references to each other; all coupling runs through the bus
//   decoders and the sync fabric.

/// Lookup tables generated once at startup. They are read-only and can be
/// shared between any number of machine instances.
pub struct ChipConstants {
    pub fm: Rc<FmOperatorConstant>,
    pub psg: Rc<PsgConstant>,
    pub vdp: Rc<VdpConstant>,
}

impl ChipConstants {
    pub fn new() -> Self {
        ChipConstants {
            fm: Rc::new(FmOperatorConstant::new()),
            psg: Rc::new(PsgConstant::new()),
            vdp: Rc::new(VdpConstant::new()),
        }
    }
}

impl Default for ChipConstants {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct Z80Control {
    pub bus_requested: bool,
    pub reset_held: bool,
    /// 9-bit window base, shifted in one bit per bank-register write.
    pub bank: u16,
}

pub(crate) struct SubCpuControl {
    pub bus_requested: bool,
    pub reset_held: bool,
}

pub(crate) struct Communication {
    pub flag: u16,
    pub command: [u16; 8],
    pub status: [u16; 8],
}

pub(crate) struct IrqState {
    /// IRQ 1-6 mask bits; index 0 is the graphics interrupt, index 1 the
    /// main-CPU-triggered IRQ 2.
    pub enabled: [bool; 6],
    pub irq1_pending: bool,
}

pub(crate) struct CdState {
    pub current_sector: u32,
    pub total_buffered_sectors: u32,
    pub cdc_ready: bool,
}

pub(crate) struct CddaState {
    pub playing: bool,
    pub repeating: bool,
    pub current_track: u16,
}

pub(crate) struct MegaCd {
    pub sub_cpu: SubCpuControl,
    pub communication: Communication,
    pub hblank_address: u16,
    pub irq: IrqState,
    pub cd: CdState,
    pub cdda: CddaState,
    /// WORD-RAM DMA transfers lag by one word; this is the word in
    /// flight.
    pub delayed_dma_word: u16,
    pub boot_from_cd: bool,
}

pub struct MegaDrive {
    // Dependencies
    pub(crate) config: Rc<Config>,
    // Chipset
    pub(crate) vdp: Vdp,
    pub(crate) fm: Fm,
    pub(crate) psg: Psg,
    pub(crate) pcm: Pcm,
    // Processors
    pub(crate) m68k: Shared<dyn Cpu68000>,
    pub(crate) z80: Shared<dyn CpuZ80>,
    pub(crate) mcd_m68k: Shared<dyn Cpu68000>,
    // Front-end capabilities
    pub(crate) cartridge: Shared<dyn Cartridge>,
    pub(crate) controllers: Shared<dyn Controllers>,
    pub(crate) video: Shared<dyn VideoOutput>,
    pub(crate) audio: Shared<dyn AudioOutput>,
    pub(crate) cd: Shared<dyn CdImage>,
    // Memory
    pub(crate) m68k_ram: Vec<u16>,
    pub(crate) z80_ram: Vec<u8>,
    pub(crate) bios_rom: Vec<u16>,
    pub(crate) word_ram: WordRam,
    pub(crate) prg_ram: PrgRam,
    // I/O
    pub(crate) io_ports: [IoPort; 3],
    // Runtime State
    pub(crate) z80_control: Z80Control,
    pub(crate) mega_cd: MegaCd,
    pub(crate) sync: SyncSet,
    pub(crate) sub_fetch_injection: Option<u16>,
    pub(crate) current_scanline: u16,
    h_int_counter: u16,
    frame_count: u32,
}

impl MegaDrive {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        config: Rc<Config>,
        constants: &ChipConstants,
        m68k: Shared<dyn Cpu68000>,
        z80: Shared<dyn CpuZ80>,
        mcd_m68k: Shared<dyn Cpu68000>,
        cartridge: Shared<dyn Cartridge>,
        controllers: Shared<dyn Controllers>,
        video: Shared<dyn VideoOutput>,
        audio: Shared<dyn AudioOutput>,
        cd: Shared<dyn CdImage>,
    ) -> MegaDrive {
        info!(target: "megadrive", "Initializing system");

        let fm_config = FmConfig {
            fm_channels_disabled: config.sound.fm_channels_disabled,
            dac_channel_disabled: config.sound.dac_channel_disabled,
        };
        let psg_config = PsgConfig {
            tone_disabled: config.sound.psg_tones_disabled,
            noise_disabled: config.sound.psg_noise_disabled,
        };
        let vdp_config = VdpConfig {
            sprites_disabled: config.video.sprites_disabled,
            window_disabled: config.video.window_disabled,
            planes_disabled: config.video.planes_disabled,
        };

        // The boot ROM image is stored as big-endian words, the way the
        // bus reads it.
        let mut bios_rom = vec![0u16; 0x10000];
        for (i, word) in bios_rom.iter_mut().enumerate() {
            let offset = i * 2;
            if offset + 1 < config.roms.cd_boot.len() {
                *word = BigEndian::read_u16(&config.roms.cd_boot[offset..]);
            }
        }

        let boot_from_cd = config.boot_from_cd;

        MegaDrive {
            vdp: Vdp::new(vdp_config, constants.vdp.clone()),
            fm: Fm::new(fm_config, constants.fm.clone()),
            psg: Psg::new(psg_config, constants.psg.clone()),
            pcm: Pcm::new(),
            m68k,
            z80,
            mcd_m68k,
            cartridge,
            controllers,
            video,
            audio,
            cd,
            m68k_ram: vec![0; 0x8000],
            z80_ram: vec![0; 0x2000],
            bios_rom,
            word_ram: WordRam::new(),
            prg_ram: PrgRam::new(),
            io_ports: [IoPort::new(), IoPort::new(), IoPort::new()],
            z80_control: Z80Control {
                bus_requested: false,
                reset_held: true,
                bank: 0,
            },
            mega_cd: MegaCd {
                sub_cpu: SubCpuControl {
                    bus_requested: false,
                    reset_held: true,
                },
                communication: Communication {
                    flag: 0,
                    command: [0; 8],
                    status: [0; 8],
                },
                hblank_address: 0xffff,
                irq: IrqState {
                    enabled: [false; 6],
                    irq1_pending: false,
                },
                cd: CdState {
                    current_sector: 0,
                    total_buffered_sectors: 0,
                    cdc_ready: false,
                },
                cdda: CddaState {
                    playing: false,
                    repeating: false,
                    current_track: 0,
                },
                delayed_dma_word: 0,
                boot_from_cd,
            },
            sync: SyncSet::default(),
            sub_fetch_injection: None,
            current_scanline: 0,
            h_int_counter: 0,
            frame_count: 0,
            config,
        }
    }

    // -- Getters

    pub fn get_config(&self) -> &Config {
        &self.config
    }

    pub fn get_frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn get_current_scanline(&self) -> u16 {
        self.current_scanline
    }

    /// Front-end hook for CD audio playback control.
    pub fn set_cdda_playback(&mut self, playing: bool, repeating: bool, track: u16) {
        self.mega_cd.cdda.playing = playing;
        self.mega_cd.cdda.repeating = repeating;
        self.mega_cd.cdda.current_track = track;
    }

    // -- Bus access, at each CPU's current point in virtual time.

    pub fn m68k_read(&mut self, address: u32, do_high_byte: bool, do_low_byte: bool) -> u16 {
        let target_cycle = CycleMegaDrive(self.sync.m68k.current_cycle);
        self.m68k_read_with_cycle(address, do_high_byte, do_low_byte, target_cycle, false)
    }

    pub fn m68k_write(&mut self, address: u32, do_high_byte: bool, do_low_byte: bool, value: u16) {
        let target_cycle = CycleMegaDrive(self.sync.m68k.current_cycle);
        self.m68k_write_with_cycle(address, do_high_byte, do_low_byte, value, target_cycle)
    }

    pub fn z80_read(&mut self, address: u16) -> u8 {
        let target_cycle = CycleMegaDrive(self.sync.z80.current_cycle);
        self.z80_read_with_cycle(address, target_cycle)
    }

    pub fn z80_write(&mut self, address: u16, value: u8) {
        let target_cycle = CycleMegaDrive(self.sync.z80.current_cycle);
        self.z80_write_with_cycle(address, value, target_cycle)
    }

    pub fn sub_read(&mut self, address: u32, do_high_byte: bool, do_low_byte: bool) -> u16 {
        let target_cycle = crate::bus::CycleMegaCd(self.sync.mcd_m68k.current_cycle);
        self.sub_read_with_cycle(address, do_high_byte, do_low_byte, target_cycle)
    }

    pub fn sub_write(&mut self, address: u32, do_high_byte: bool, do_low_byte: bool, value: u16) {
        let target_cycle = crate::bus::CycleMegaCd(self.sync.mcd_m68k.current_cycle);
        self.sub_write_with_cycle(address, do_high_byte, do_low_byte, value, target_cycle)
    }

    // -- Interrupt delivery

    fn m68k_interrupt(&mut self, level: u8) {
        let cpu = self.m68k.clone();
        let mut cpu = cpu.borrow_mut();
        cpu.interrupt(&mut MainBus { machine: &mut *self }, level);
    }

    fn z80_interrupt(&mut self) {
        let cpu = self.z80.clone();
        let mut cpu = cpu.borrow_mut();
        cpu.interrupt(&mut Z80Bus { machine: &mut *self });
    }

    pub(crate) fn mcd_m68k_interrupt(&mut self, level: u8) {
        let cpu = self.mcd_m68k.clone();
        let mut cpu = cpu.borrow_mut();
        cpu.interrupt(&mut SubBus { machine: &mut *self }, level);
    }

    pub(crate) fn mcd_m68k_reset(&mut self) {
        let cpu = self.mcd_m68k.clone();
        let mut cpu = cpu.borrow_mut();
        cpu.reset(&mut SubBus { machine: &mut *self });
    }

    // -- Machine operations

    pub fn reset(&mut self, hard: bool) {
        info!(target: "megadrive", "Resetting system");
        // Chipset
        self.vdp.reset();
        self.fm.reset();
        self.psg.reset();
        self.pcm.reset();
        // Memory
        if hard {
            for word in self.m68k_ram.iter_mut() {
                *word = 0;
            }
            for byte in self.z80_ram.iter_mut() {
                *byte = 0;
            }
            self.word_ram = WordRam::new();
            self.prg_ram = PrgRam::new();
        }
        // I/O
        for io_port in self.io_ports.iter_mut() {
            io_port.reset();
        }
        // Runtime State
        self.z80_control.bus_requested = false;
        self.z80_control.reset_held = true;
        self.z80_control.bank = 0;
        self.mega_cd.sub_cpu.bus_requested = false;
        self.mega_cd.sub_cpu.reset_held = true;
        self.sync = SyncSet::default();
        self.sub_fetch_injection = None;
        self.current_scanline = 0;
        self.h_int_counter = 0;
        self.frame_count = 0;
        // Processors
        let cpu = self.m68k.clone();
        cpu.borrow_mut().reset(&mut MainBus { machine: &mut *self });
        self.z80.clone().borrow_mut().reset();
        self.mcd_m68k_reset();
    }

    /// Runs every device for one frame of emulated time, scanline by
    /// scanline, delivering interrupts and rendered lines along the way.
    pub fn run_frame(&mut self) {
        self.sync.begin_frame();
        self.vdp.set_vblank(false);

        let tv_standard = self.config.model.tv_standard;
        let cycles_per_scanline = self.config.model.cycles_per_scanline;
        let total_scanlines = u32::from(self.config.model.scanlines_per_frame);
        let visible_scanlines = u32::from(self.vdp.get_visible_scanlines());

        for scanline in 0..total_scanlines {
            self.current_scanline = scanline as u16;

            let target_cycle = CycleMegaDrive((scanline + 1) * cycles_per_scanline);
            self.sync_m68k(target_cycle);
            self.sync_z80(target_cycle);
            self.sync_mcd_m68k(target_cycle.to_mega_cd(tv_standard));

            if scanline < visible_scanlines {
                // The H-interrupt counter runs through the active
                // display and reloads on expiry.
                if self.h_int_counter == 0 {
                    self.h_int_counter = u16::from(self.vdp.get_h_int_interval());
                    if self.vdp.is_h_int_enabled() {
                        self.m68k_interrupt(4);
                    }
                } else {
                    self.h_int_counter -= 1;
                }

                if self.vdp.is_double_resolution() {
                    self.render_scanline(scanline as usize * 2);
                    self.render_scanline(scanline as usize * 2 + 1);
                } else {
                    self.render_scanline(scanline as usize);
                }
            } else {
                self.h_int_counter = u16::from(self.vdp.get_h_int_interval());

                if scanline == visible_scanlines {
                    // Entering the vertical blanking area.
                    self.vdp.set_vblank(true);
                    if self.vdp.is_v_int_enabled() {
                        self.m68k_interrupt(6);
                    }
                    self.z80_interrupt();

                    if self.mega_cd.irq.irq1_pending {
                        self.mega_cd.irq.irq1_pending = false;
                        self.mcd_m68k_interrupt(1);
                    }
                }
            }
        }

        // Flush the audio devices to the end of the frame.
        let frame_end = CycleMegaDrive(total_scanlines * cycles_per_scanline);
        self.sync_fm(frame_end);
        self.sync_psg(frame_end);
        self.sync_pcm(frame_end.to_mega_cd(tv_standard));
        self.sync_cdda(self.config.model.audio_frames_per_frame() as usize);

        self.frame_count = self.frame_count.wrapping_add(1);
    }

    /// Renders one scanline into the front-end. The renderer is pure with
    /// respect to VDP state, so the front-end may call this at any point
    /// between scanlines.
    pub fn render_scanline(&mut self, scanline: usize) {
        let video = self.video.clone();
        self.vdp.render_scanline(scanline, &mut *video.borrow_mut());
    }
}
