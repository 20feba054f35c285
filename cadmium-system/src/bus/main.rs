// This file is part of cadmium.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use bit_field::BitField;

use cadmium_core::factory::{Bus68000, Region, TvStandard};

use crate::system::MegaDrive;

use super::sync::{CycleMegaDrive, M68K_CLOCK_DIVIDER};

// Spec: SEGA GENESIS SOFTWARE MANUAL, memory map section
// Design:
//   The decoder works on word addresses; byte lanes are expressed with
//   the two byte-enable flags, mirroring the 68000's UDS/LDS lines.

pub(crate) fn merge_word(word: &mut u16, value: u16, mask: u16) {
    *word = (*word & !mask) | (value & mask);
}

fn byte_mask(do_high_byte: bool, do_low_byte: bool) -> u16 {
    let mut mask = 0;
    if do_high_byte {
        mask |= 0xff00;
    }
    if do_low_byte {
        mask |= 0x00ff;
    }
    mask
}

/// Bus view handed to the main 68000 core for the duration of one
/// instruction.
pub(crate) struct MainBus<'a> {
    pub machine: &'a mut MegaDrive,
}

impl Bus68000 for MainBus<'_> {
    fn read(&mut self, address: u32, do_high_byte: bool, do_low_byte: bool) -> u16 {
        let target_cycle = CycleMegaDrive(self.machine.sync.m68k.current_cycle);
        self.machine
            .m68k_read_with_cycle(address, do_high_byte, do_low_byte, target_cycle, false)
    }

    fn write(&mut self, address: u32, do_high_byte: bool, do_low_byte: bool, value: u16) {
        let target_cycle = CycleMegaDrive(self.machine.sync.m68k.current_cycle);
        self.machine
            .m68k_write_with_cycle(address, do_high_byte, do_low_byte, value, target_cycle)
    }
}

impl MegaDrive {
    /// Advances the main CPU to the target cycle, using the remembered
    /// per-instruction countdown so that partial instructions survive
    /// across catch-ups.
    pub(crate) fn sync_m68k(&mut self, target_cycle: CycleMegaDrive) {
        if target_cycle.0 <= self.sync.m68k.current_cycle {
            // Nested catch-ups from devices running behind the main CPU
            // land here; there is nothing to do.
            return;
        }

        let cpu = self.m68k.clone();
        let mut cpu = cpu.borrow_mut();

        let mut countdown = self.sync.m68k.cycle_countdown;

        while self.sync.m68k.current_cycle < target_cycle.0 {
            let cycles_to_do = countdown.min(target_cycle.0 - self.sync.m68k.current_cycle);

            self.sync.m68k.current_cycle += cycles_to_do;
            countdown -= cycles_to_do;

            if countdown == 0 {
                let instruction_cycles = cpu.do_cycle(&mut MainBus { machine: &mut *self });
                countdown = M68K_CLOCK_DIVIDER * instruction_cycles;
            }
        }

        self.sync.m68k.cycle_countdown = countdown;
    }

    pub(crate) fn m68k_read_with_cycle(
        &mut self,
        address: u32,
        do_high_byte: bool,
        do_low_byte: bool,
        target_cycle: CycleMegaDrive,
        is_vdp_dma: bool,
    ) -> u16 {
        let mut value = 0;

        match address {
            0x000000..=0x3fffff => {
                if ((address & 0x200000) == 0) != self.mega_cd.boot_from_cd {
                    // Cartridge
                    let cartridge = self.cartridge.clone();
                    let mut cartridge = cartridge.borrow_mut();
                    if do_high_byte {
                        value |= u16::from(cartridge.read((address & 0x1fffff) * 2)) << 8;
                    }
                    if do_low_byte {
                        value |= u16::from(cartridge.read((address & 0x1fffff) * 2 + 1));
                    }
                } else if address & 0x100000 != 0 {
                    // WORD-RAM
                    if self.word_ram.in_1m_mode {
                        if address & 0x10000 != 0 {
                            warn!(target: "bus::m68k", "MAIN-CPU attempted to read from the cell-image half of 1M WORD-RAM");
                        } else {
                            let index =
                                (address as usize & 0xffff) * 2 + usize::from(self.word_ram.ret);
                            value = self.word_ram.buffer[index];

                            if is_vdp_dma {
                                // WORD-RAM DMA transfers are delayed by
                                // one word. This is a real Mega CD bug
                                // that games have to work around.
                                let delayed_value = value;
                                value = self.mega_cd.delayed_dma_word;
                                self.mega_cd.delayed_dma_word = delayed_value;
                            }
                        }
                    } else if self.word_ram.dmna {
                        warn!(target: "bus::m68k", "MAIN-CPU attempted to read from WORD-RAM while SUB-CPU has it");
                    } else {
                        value = self.word_ram.buffer[address as usize & 0x1ffff];
                    }
                } else if address & 0x10000 == 0 {
                    // Mega CD BIOS
                    if address & 0xffff == 0x72 / 2 {
                        // The H-int interrupt address can be overridden
                        // with a register, so its BIOS word is patched
                        // on the fly.
                        value = self.mega_cd.hblank_address;
                    } else {
                        value = self.bios_rom[address as usize & 0xffff];
                    }
                } else {
                    // PRG-RAM
                    if !self.mega_cd.sub_cpu.bus_requested {
                        warn!(target: "bus::m68k", "MAIN-CPU attempted to read from PRG-RAM while SUB-CPU has it");
                    } else {
                        let index = 0x10000 * usize::from(self.prg_ram.bank)
                            + (address as usize & 0xffff);
                        value = self.prg_ram.buffer[index];
                    }
                }
            }
            0x500000..=0x500fff | 0x502000 | 0x502001 => {
                // Z80 RAM and FM ports
                if !self.z80_control.bus_requested {
                    warn!(target: "bus::m68k", "68k attempted to read Z80 memory/FM ports without Z80 bus");
                } else if self.z80_control.reset_held {
                    warn!(target: "bus::m68k", "68k attempted to read Z80 memory/FM ports while Z80 reset was held");
                } else if do_high_byte && do_low_byte {
                    warn!(target: "bus::m68k", "68k attempted a word-sized read of Z80 memory/FM ports");
                } else if do_high_byte {
                    value = u16::from(self.z80_read_with_cycle(
                        (address * 2) as u16 & 0xffff,
                        target_cycle,
                    )) << 8;
                } else {
                    value = u16::from(
                        self.z80_read_with_cycle((address * 2 + 1) as u16 & 0xffff, target_cycle),
                    );
                }
            }
            0x508000 => {
                // Version register
                if do_low_byte {
                    let overseas = self.config.region == Region::Overseas;
                    let pal = self.config.model.tv_standard == TvStandard::Pal;
                    // Bit 5 clear means a Mega CD is attached.
                    value |= (u16::from(overseas) << 7) | (u16::from(pal) << 6);
                }
            }
            0x508001 | 0x508002 => {
                // Controller port data
                if do_low_byte {
                    let port = (address - 0x508001) as usize;
                    self.sync_io_port(port, target_cycle);
                    let controllers = self.controllers.clone();
                    let input = controllers.borrow_mut().read(port);
                    value = u16::from(self.io_ports[port].read_data(input));
                }
            }
            0x508003 => {
                // Expansion port data
                value = 0xff;
            }
            0x508004..=0x508006 => {
                // Controller port control
                if do_low_byte {
                    let port = (address - 0x508004) as usize;
                    value = u16::from(self.io_ports[port].get_control());
                }
            }
            0x508007..=0x50800f => {
                // Serial control registers are not modelled.
            }
            0x508800 => {
                // MEMORY MODE: only functional on earlier models.
            }
            0x508880 => {
                // Z80 BUSREQ: the bus is granted while the Z80 is halted.
                let z80_running = !self.z80_control.bus_requested;
                value = u16::from(z80_running) << 8;
            }
            0x508900 => {
                // Z80 RESET reads back as open bus.
            }
            0x509000 => {
                // SUB-CPU RESET, HALT
                value = (u16::from(self.mega_cd.irq.enabled[1]) << 15)
                    | (u16::from(self.mega_cd.sub_cpu.bus_requested) << 1)
                    | u16::from(!self.mega_cd.sub_cpu.reset_held);
            }
            0x509001 => {
                // Memory mode / write protect
                value = (u16::from(self.prg_ram.bank) << 6)
                    | (u16::from(self.word_ram.in_1m_mode) << 2)
                    | (u16::from(self.word_ram.dmna) << 1)
                    | u16::from(self.word_ram.ret);
            }
            0x509002 => {
                warn!(target: "bus::m68k", "MAIN-CPU attempted to read from CDC mode register");
            }
            0x509003 => {
                // H-INT vector
                value = self.mega_cd.hblank_address;
            }
            0x509004 => {
                warn!(target: "bus::m68k", "MAIN-CPU attempted to read from CDC host data register");
            }
            0x509006 => {
                warn!(target: "bus::m68k", "MAIN-CPU attempted to read from stop watch register");
            }
            0x509007 => {
                // Communication flag
                self.sync_mcd_m68k(target_cycle.to_mega_cd(self.config.model.tv_standard));
                value = self.mega_cd.communication.flag;
            }
            0x509008..=0x50900f => {
                // Communication command
                self.sync_mcd_m68k(target_cycle.to_mega_cd(self.config.model.tv_standard));
                value = self.mega_cd.communication.command[(address - 0x509008) as usize];
            }
            0x509010..=0x509017 => {
                // Communication status
                self.sync_mcd_m68k(target_cycle.to_mega_cd(self.config.model.tv_standard));
                value = self.mega_cd.communication.status[(address - 0x509010) as usize];
            }
            0x509018 => {
                warn!(target: "bus::m68k", "MAIN-CPU attempted to read from Timer W/INT3 register");
            }
            0x509019 => {
                warn!(target: "bus::m68k", "MAIN-CPU attempted to read from interrupt mask control register");
            }
            0x600000 | 0x600001 => {
                // VDP data port
                value = self.vdp.read_data();
            }
            0x600002 | 0x600003 => {
                // VDP control port
                value = self.vdp.read_control();
                value |= u16::from(self.config.model.tv_standard == TvStandard::Pal);
            }
            0x600004 => {
                // HV counter: the V counter is the low 8 bits of the
                // current scanline.
                value = (self.current_scanline & 0xff) << 8;
            }
            0x600008..=0x60000b => {
                // Reading the PSG freezes a real 68000.
                warn!(target: "bus::m68k", "68k attempted to read from the PSG");
            }
            0x700000..=0x7fffff => {
                // Work RAM, word-mirrored through the whole region.
                value = self.m68k_ram[address as usize & 0x7fff];
            }
            _ => {
                warn!(target: "bus::m68k", "Attempted to read invalid 68k address 0x{:x}", address * 2);
            }
        }

        value
    }

    pub(crate) fn m68k_write_with_cycle(
        &mut self,
        address: u32,
        do_high_byte: bool,
        do_low_byte: bool,
        value: u16,
        target_cycle: CycleMegaDrive,
    ) {
        let mask = byte_mask(do_high_byte, do_low_byte);
        let high_byte = ((value >> 8) & 0xff) as u8;
        let low_byte = (value & 0xff) as u8;

        match address {
            0x000000..=0x3fffff => {
                if ((address & 0x200000) == 0) != self.mega_cd.boot_from_cd {
                    // Cartridge
                    let cartridge = self.cartridge.clone();
                    let mut cartridge = cartridge.borrow_mut();
                    if do_high_byte {
                        cartridge.write((address & 0x1fffff) * 2, high_byte);
                    }
                    if do_low_byte {
                        cartridge.write((address & 0x1fffff) * 2 + 1, low_byte);
                    }
                    warn!(target: "bus::m68k", "Attempted to write to ROM address 0x{:x}", address * 2);
                } else if address & 0x100000 != 0 {
                    // WORD-RAM
                    if self.word_ram.in_1m_mode {
                        if address & 0x10000 != 0 {
                            warn!(target: "bus::m68k", "MAIN-CPU attempted to write to the cell-image half of 1M WORD-RAM");
                        } else {
                            let index =
                                (address as usize & 0xffff) * 2 + usize::from(self.word_ram.ret);
                            merge_word(&mut self.word_ram.buffer[index], value, mask);
                        }
                    } else if self.word_ram.dmna {
                        warn!(target: "bus::m68k", "MAIN-CPU attempted to write to WORD-RAM while SUB-CPU has it");
                    } else {
                        merge_word(
                            &mut self.word_ram.buffer[address as usize & 0x1ffff],
                            value,
                            mask,
                        );
                    }
                } else if address & 0x10000 == 0 {
                    warn!(target: "bus::m68k", "MAIN-CPU attempted to write to BIOS (0x{:x})", address * 2);
                } else {
                    // PRG-RAM
                    if !self.mega_cd.sub_cpu.bus_requested {
                        warn!(target: "bus::m68k", "MAIN-CPU attempted to write to PRG-RAM while SUB-CPU has it");
                    } else {
                        let index = 0x10000 * usize::from(self.prg_ram.bank)
                            + (address as usize & 0xffff);
                        merge_word(&mut self.prg_ram.buffer[index], value, mask);
                    }
                }
            }
            0x500000..=0x500fff | 0x502000 | 0x502001 => {
                // Z80 RAM and FM ports
                if !self.z80_control.bus_requested {
                    warn!(target: "bus::m68k", "68k attempted to write Z80 memory/FM ports without Z80 bus");
                } else if self.z80_control.reset_held {
                    warn!(target: "bus::m68k", "68k attempted to write Z80 memory/FM ports while Z80 reset was held");
                } else if do_high_byte && do_low_byte {
                    warn!(target: "bus::m68k", "68k attempted a word-sized write of Z80 memory/FM ports");
                } else if do_high_byte {
                    self.z80_write_with_cycle((address * 2) as u16 & 0xffff, high_byte, target_cycle);
                } else {
                    self.z80_write_with_cycle(
                        (address * 2 + 1) as u16 & 0xffff,
                        low_byte,
                        target_cycle,
                    );
                }
            }
            0x508000 => {
                // Version register is read-only.
            }
            0x508001..=0x508003 => {
                // Controller port data
                if do_low_byte {
                    let port = (address - 0x508001) as usize;
                    self.sync_io_port(port, target_cycle);
                    let driven = self.io_ports[port].write_data(low_byte);
                    let controllers = self.controllers.clone();
                    controllers.borrow_mut().write(port, driven);
                }
            }
            0x508004..=0x508006 => {
                // Controller port control
                if do_low_byte {
                    let port = (address - 0x508004) as usize;
                    self.io_ports[port].set_control(low_byte);
                }
            }
            0x508007..=0x50800f => {
                // Serial control registers are not modelled.
            }
            0x508800 => {
                // MEMORY MODE
            }
            0x508880 => {
                // Z80 BUSREQ
                if do_high_byte {
                    let bus_request = high_byte.get_bit(0);

                    if self.z80_control.bus_requested != bus_request {
                        self.sync_z80(target_cycle);
                    }

                    self.z80_control.bus_requested = bus_request;
                }
            }
            0x508900 => {
                // Z80 RESET
                if do_high_byte {
                    let new_reset_held = !high_byte.get_bit(0);

                    if self.z80_control.reset_held && !new_reset_held {
                        self.sync_z80(target_cycle);
                        self.z80.clone().borrow_mut().reset();
                        // Releasing the Z80 reset also resets the FM.
                        self.fm.reset();
                    }

                    self.z80_control.reset_held = new_reset_held;
                }
            }
            0x509000 => {
                // SUB-CPU RESET, HALT
                let mcd_cycle = target_cycle.to_mega_cd(self.config.model.tv_standard);

                let interrupt = high_byte.get_bit(0);
                let bus_request = low_byte.get_bit(1);
                let reset = !low_byte.get_bit(0);

                if self.mega_cd.sub_cpu.bus_requested != bus_request {
                    self.sync_mcd_m68k(mcd_cycle);
                }

                if self.mega_cd.sub_cpu.reset_held && !reset {
                    self.sync_mcd_m68k(mcd_cycle);
                    self.mcd_m68k_reset();
                }

                if interrupt && self.mega_cd.irq.enabled[1] {
                    self.sync_mcd_m68k(mcd_cycle);
                    self.mcd_m68k_interrupt(2);
                }

                self.mega_cd.sub_cpu.bus_requested = bus_request;
                self.mega_cd.sub_cpu.reset_held = reset;
            }
            0x509001 => {
                // Memory mode / write protect
                if do_low_byte {
                    if low_byte.get_bit(1) {
                        self.sync_mcd_m68k(target_cycle.to_mega_cd(self.config.model.tv_standard));

                        self.word_ram.dmna = true;

                        if !self.word_ram.in_1m_mode {
                            self.word_ram.ret = false;
                        }
                    }

                    self.prg_ram.bank = (low_byte >> 6) & 3;
                }
            }
            0x509002 => {
                warn!(target: "bus::m68k", "MAIN-CPU attempted to write to CDC mode register");
            }
            0x509003 => {
                // H-INT vector
                merge_word(&mut self.mega_cd.hblank_address, value, mask);
            }
            0x509004 => {
                warn!(target: "bus::m68k", "MAIN-CPU attempted to write to CDC host data register");
            }
            0x509006 => {
                warn!(target: "bus::m68k", "MAIN-CPU attempted to write to stop watch register");
            }
            0x509007 => {
                // Communication flag: the main CPU owns the high byte.
                if do_high_byte {
                    self.sync_mcd_m68k(target_cycle.to_mega_cd(self.config.model.tv_standard));
                    self.mega_cd.communication.flag =
                        (self.mega_cd.communication.flag & 0x00ff) | (value & 0xff00);
                }
                if do_low_byte {
                    warn!(target: "bus::m68k", "MAIN-CPU attempted to write to SUB-CPU's communication flag");
                }
            }
            0x509008..=0x50900f => {
                // Communication command
                self.sync_mcd_m68k(target_cycle.to_mega_cd(self.config.model.tv_standard));
                merge_word(
                    &mut self.mega_cd.communication.command[(address - 0x509008) as usize],
                    value,
                    mask,
                );
            }
            0x509010..=0x509017 => {
                warn!(target: "bus::m68k", "MAIN-CPU attempted to write to SUB-CPU's communication status");
            }
            0x509018 => {
                warn!(target: "bus::m68k", "MAIN-CPU attempted to write to Timer W/INT3 register");
            }
            0x509019 => {
                warn!(target: "bus::m68k", "MAIN-CPU attempted to write to interrupt mask control register");
            }
            0x600000 | 0x600001 => {
                // VDP data port
                let video = self.video.clone();
                self.vdp.write_data(value, &mut *video.borrow_mut());
            }
            0x600002 | 0x600003 => {
                // VDP control port
                self.vdp_write_control(value, target_cycle);
            }
            0x600004 => {
                // HV counter is read-only.
            }
            0x600008..=0x60000b => {
                // PSG
                if do_low_byte {
                    self.sync_z80(target_cycle);
                    self.sync_psg(target_cycle);
                    self.psg.do_command(low_byte);
                }
            }
            0x700000..=0x7fffff => {
                merge_word(&mut self.m68k_ram[address as usize & 0x7fff], value, mask);
            }
            _ => {
                warn!(target: "bus::m68k", "Attempted to write invalid 68k address 0x{:x}", address * 2);
            }
        }
    }

    /// A second control-port write may fire a memory-to-VRAM DMA; each
    /// fetched word is read off this bus (with the DMA flag raised, which
    /// enables the WORD-RAM delay bug) and piped through the VDP's normal
    /// write path.
    pub(crate) fn vdp_write_control(&mut self, value: u16, target_cycle: CycleMegaDrive) {
        let video = self.video.clone();
        let fire_memory_to_vram = self.vdp.write_control(value, &mut *video.borrow_mut());

        if fire_memory_to_vram {
            loop {
                let source = self.vdp.dma_source_address();
                let word = self.m68k_read_with_cycle(source / 2, true, true, target_cycle, true);
                if self
                    .vdp
                    .dma_write_and_advance(word, &mut *video.borrow_mut())
                {
                    break;
                }
            }
        }
    }
}
