// This file is part of cadmium.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use bit_field::BitField;
use byteorder::{BigEndian, ByteOrder};

use cadmium_core::factory::{Bus68000, Cpu68000};
use cadmium_core::util::to_bcd;

use crate::system::MegaDrive;

use super::main::merge_word;
use super::sync::{CycleMegaCd, MCD_M68K_CLOCK_DIVIDER};

// BIOS traps: fetches from the BRAM and CD driver jump-table entries are
// intercepted, the call is serviced against the emulator state, and an
// RTS opcode is injected as the fetched "instruction".
const BRAM_CALL_ADDRESS: u32 = 0x5f16;
const BIOS_CALL_ADDRESS: u32 = 0x5f22;
const RTS_OPCODE: u16 = 0x4e75;

/// Bus view handed to the sub 68000 core for the duration of one
/// instruction.
pub(crate) struct SubBus<'a> {
    pub machine: &'a mut MegaDrive,
}

impl Bus68000 for SubBus<'_> {
    fn read(&mut self, address: u32, do_high_byte: bool, do_low_byte: bool) -> u16 {
        let target_cycle = CycleMegaCd(self.machine.sync.mcd_m68k.current_cycle);
        self.machine
            .sub_read_with_cycle(address, do_high_byte, do_low_byte, target_cycle)
    }

    fn write(&mut self, address: u32, do_high_byte: bool, do_low_byte: bool, value: u16) {
        let target_cycle = CycleMegaCd(self.machine.sync.mcd_m68k.current_cycle);
        self.machine
            .sub_write_with_cycle(address, do_high_byte, do_low_byte, value, target_cycle)
    }
}

impl MegaDrive {
    /// Advances the sub CPU to the target cycle. While the main CPU holds
    /// its bus or reset line, time passes without instructions being
    /// executed.
    pub(crate) fn sync_mcd_m68k(&mut self, target_cycle: CycleMegaCd) {
        if target_cycle.0 <= self.sync.mcd_m68k.current_cycle {
            return;
        }

        let cpu = self.mcd_m68k.clone();
        let mut cpu = cpu.borrow_mut();

        let mut countdown = self.sync.mcd_m68k.cycle_countdown;

        while self.sync.mcd_m68k.current_cycle < target_cycle.0 {
            let cycles_to_do = countdown.min(target_cycle.0 - self.sync.mcd_m68k.current_cycle);

            self.sync.mcd_m68k.current_cycle += cycles_to_do;
            countdown -= cycles_to_do;

            if countdown == 0 {
                let halted =
                    self.mega_cd.sub_cpu.bus_requested || self.mega_cd.sub_cpu.reset_held;

                let instruction_cycles = if halted {
                    1
                } else {
                    let current_cycle = CycleMegaCd(self.sync.mcd_m68k.current_cycle);

                    match cpu.get_pc() {
                        BRAM_CALL_ADDRESS => {
                            self.bram_call(&mut *cpu);
                            self.sub_fetch_injection = Some(RTS_OPCODE);
                        }
                        BIOS_CALL_ADDRESS => {
                            self.mega_cd_bios_call(&mut *cpu, current_cycle);
                            self.sub_fetch_injection = Some(RTS_OPCODE);
                        }
                        _ => (),
                    }

                    cpu.do_cycle(&mut SubBus { machine: &mut *self })
                };

                countdown = MCD_M68K_CLOCK_DIVIDER * instruction_cycles;
            }
        }

        self.sync.mcd_m68k.cycle_countdown = countdown;
    }

    pub(crate) fn sub_read_with_cycle(
        &mut self,
        address: u32,
        _do_high_byte: bool,
        _do_low_byte: bool,
        target_cycle: CycleMegaCd,
    ) -> u16 {
        // A pending BIOS trap replaces the next instruction fetch.
        if let Some(opcode) = self.sub_fetch_injection.take() {
            return opcode;
        }

        let tv_standard = self.config.model.tv_standard;
        let mut value = 0;

        match address {
            0x000000..=0x03ffff => {
                // PRG-RAM
                value = self.prg_ram.buffer[address as usize];
            }
            0x040000..=0x05ffff => {
                // WORD-RAM, 2M mode
                if self.word_ram.in_1m_mode {
                    warn!(target: "bus::sub", "SUB-CPU attempted to read from 2M WORD-RAM in 1M mode");
                } else if !self.word_ram.dmna {
                    warn!(target: "bus::sub", "SUB-CPU attempted to read from WORD-RAM while MAIN-CPU has it");
                } else {
                    value = self.word_ram.buffer[address as usize & 0x1ffff];
                }
            }
            0x060000..=0x06ffff => {
                // WORD-RAM, 1M bank
                if !self.word_ram.in_1m_mode {
                    warn!(target: "bus::sub", "SUB-CPU attempted to read from the 1M half of WORD-RAM in 2M mode");
                } else {
                    let index =
                        (address as usize & 0xffff) * 2 + usize::from(!self.word_ram.ret);
                    value = self.word_ram.buffer[index];
                }
            }
            0x7f8000..=0x7fbfff => {
                if address & 0x1000 != 0 {
                    // PCM wave RAM
                    warn!(target: "bus::sub", "SUB-CPU attempted to read from PCM wave RAM");
                } else {
                    // PCM register
                    self.sync_pcm(target_cycle);
                    value = u16::from(self.pcm.read_register((address & 0xfff) as u16));
                }
            }
            0x7fc001 => {
                // Memory mode / write protect
                value = (u16::from(self.word_ram.in_1m_mode) << 2)
                    | (u16::from(self.word_ram.dmna) << 1)
                    | u16::from(self.word_ram.ret);
            }
            0x7fc002 => {
                // CDC mode / device destination
                value = 0x4000;
            }
            0x7fc003 => {
                warn!(target: "bus::sub", "SUB-CPU attempted to read from H-INT vector register");
            }
            0x7fc004 => {
                warn!(target: "bus::sub", "SUB-CPU attempted to read from CDC host data register");
            }
            0x7fc006 => {
                warn!(target: "bus::sub", "SUB-CPU attempted to read from stop watch register");
            }
            0x7fc007 => {
                // Communication flag
                self.sync_m68k(target_cycle.to_mega_drive(tv_standard));
                value = self.mega_cd.communication.flag;
            }
            0x7fc008..=0x7fc00f => {
                // Communication command
                self.sync_m68k(target_cycle.to_mega_drive(tv_standard));
                value = self.mega_cd.communication.command[(address - 0x7fc008) as usize];
            }
            0x7fc010..=0x7fc017 => {
                // Communication status
                self.sync_m68k(target_cycle.to_mega_drive(tv_standard));
                value = self.mega_cd.communication.status[(address - 0x7fc010) as usize];
            }
            0x7fc018 => {
                warn!(target: "bus::sub", "SUB-CPU attempted to read from Timer W/INT3 register");
            }
            0x7fc019 => {
                // Interrupt mask control
                for (i, &enabled) in self.mega_cd.irq.enabled.iter().enumerate() {
                    value |= u16::from(enabled) << (1 + i);
                }
            }
            0x7fc02c => {
                // Stamp data size: graphics operations are stubbed.
            }
            0x7fc032 => {
                // Image buffer vertical draw size: stubbed.
            }
            0x7fc033 => {
                // Trace vector base address: stubbed.
            }
            _ => {
                warn!(target: "bus::sub", "Attempted to read invalid MCD 68k address 0x{:x}", address * 2);
            }
        }

        value
    }

    pub(crate) fn sub_write_with_cycle(
        &mut self,
        address: u32,
        do_high_byte: bool,
        do_low_byte: bool,
        value: u16,
        target_cycle: CycleMegaCd,
    ) {
        let tv_standard = self.config.model.tv_standard;

        let mut mask = 0;
        if do_high_byte {
            mask |= 0xff00;
        }
        if do_low_byte {
            mask |= 0x00ff;
        }

        match address {
            0x000000..=0x03ffff => {
                // PRG-RAM
                merge_word(&mut self.prg_ram.buffer[address as usize], value, mask);
            }
            0x040000..=0x05ffff => {
                // WORD-RAM, 2M mode
                if self.word_ram.in_1m_mode {
                    warn!(target: "bus::sub", "SUB-CPU attempted to write to 2M WORD-RAM in 1M mode");
                } else if !self.word_ram.dmna {
                    warn!(target: "bus::sub", "SUB-CPU attempted to write to WORD-RAM while MAIN-CPU has it");
                } else {
                    merge_word(
                        &mut self.word_ram.buffer[address as usize & 0x1ffff],
                        value,
                        mask,
                    );
                }
            }
            0x060000..=0x06ffff => {
                // WORD-RAM, 1M bank
                if !self.word_ram.in_1m_mode {
                    warn!(target: "bus::sub", "SUB-CPU attempted to write to the 1M half of WORD-RAM in 2M mode");
                } else {
                    let index =
                        (address as usize & 0xffff) * 2 + usize::from(!self.word_ram.ret);
                    merge_word(&mut self.word_ram.buffer[index], value, mask);
                }
            }
            0x7f8000..=0x7fbfff => {
                if do_low_byte {
                    self.sync_pcm(target_cycle);

                    if address & 0x1000 != 0 {
                        // PCM wave RAM
                        self.pcm
                            .write_wave_ram((address & 0xfff) as u16, (value & 0xff) as u8);
                    } else {
                        // PCM register
                        self.pcm
                            .write_register((address & 0xfff) as u16, (value & 0xff) as u8);
                    }
                }
            }
            0x7fc001 => {
                // Memory mode / write protect
                if do_low_byte {
                    let ret = value.get_bit(0);

                    self.sync_m68k(target_cycle.to_mega_drive(tv_standard));

                    self.word_ram.in_1m_mode = value.get_bit(2);

                    if ret || self.word_ram.in_1m_mode {
                        self.word_ram.dmna = false;
                        self.word_ram.ret = ret;
                    }
                }
            }
            0x7fc002 => {
                warn!(target: "bus::sub", "SUB-CPU attempted to write to CDC mode/destination register");
            }
            0x7fc003 => {
                warn!(target: "bus::sub", "SUB-CPU attempted to write to H-INT vector register");
            }
            0x7fc004 => {
                warn!(target: "bus::sub", "SUB-CPU attempted to write to CDC host data register");
            }
            0x7fc006 => {
                warn!(target: "bus::sub", "SUB-CPU attempted to write to stop watch register");
            }
            0x7fc007 => {
                // Communication flag: the sub CPU owns the low byte.
                if do_high_byte {
                    warn!(target: "bus::sub", "SUB-CPU attempted to write to MAIN-CPU's communication flag");
                }
                if do_low_byte {
                    self.sync_m68k(target_cycle.to_mega_drive(tv_standard));
                    self.mega_cd.communication.flag =
                        (self.mega_cd.communication.flag & 0xff00) | (value & 0x00ff);
                }
            }
            0x7fc008..=0x7fc00f => {
                warn!(target: "bus::sub", "SUB-CPU attempted to write to MAIN-CPU's communication command");
            }
            0x7fc010..=0x7fc017 => {
                // Communication status
                self.sync_m68k(target_cycle.to_mega_drive(tv_standard));
                merge_word(
                    &mut self.mega_cd.communication.status[(address - 0x7fc010) as usize],
                    value,
                    mask,
                );
            }
            0x7fc018 => {
                warn!(target: "bus::sub", "SUB-CPU attempted to write to Timer W/INT3 register");
            }
            0x7fc019 => {
                // Interrupt mask control
                if do_low_byte {
                    for (i, enabled) in self.mega_cd.irq.enabled.iter_mut().enumerate() {
                        *enabled = value & (1 << (1 + i)) != 0;
                    }

                    if !self.mega_cd.irq.enabled[0] {
                        self.mega_cd.irq.irq1_pending = false;
                    }
                }
            }
            0x7fc02c => {
                // Stamp data size: graphics operations are stubbed.
            }
            0x7fc032 => {
                // Image buffer vertical draw size: stubbed.
            }
            0x7fc033 => {
                // Trace vector base address: writing it kicks off a
                // graphics operation, which immediately "completes".
                if self.mega_cd.irq.enabled[0] {
                    self.mega_cd.irq.irq1_pending = true;
                }
            }
            _ => {
                warn!(target: "bus::sub", "Attempted to write invalid MCD 68k address 0x{:x}", address * 2);
            }
        }
    }

    fn sub_read_word(&mut self, address: u32, target_cycle: CycleMegaCd) -> u16 {
        self.sub_read_with_cycle((address & 0xffffff) / 2, true, true, target_cycle)
    }

    fn sub_read_longword(&mut self, address: u32, target_cycle: CycleMegaCd) -> u32 {
        (u32::from(self.sub_read_word(address, target_cycle)) << 16)
            | u32::from(self.sub_read_word(address.wrapping_add(2), target_cycle))
    }

    fn sub_write_word(&mut self, address: u32, value: u16, target_cycle: CycleMegaCd) {
        self.sub_write_with_cycle((address & 0xffffff) / 2, true, true, value, target_cycle);
    }

    fn sub_write_longword(&mut self, address: u32, value: u32, target_cycle: CycleMegaCd) {
        self.sub_write_word(address, (value >> 16) as u16, target_cycle);
        self.sub_write_word(address.wrapping_add(2), (value & 0xffff) as u16, target_cycle);
    }

    /// Minute/second/frame header of the current sector, packed as BCD
    /// with the data-track mode byte in the low bits.
    fn cd_sector_header(&self) -> u32 {
        let sector = self.mega_cd.cd.current_sector;
        let frames = to_bcd(sector % 75);
        let seconds = to_bcd((sector / 75) % 60);
        let minutes = to_bcd(sector / (75 * 60));

        0x01 | (frames << 8) | (seconds << 16) | (minutes << 24)
    }

    /// Backup-RAM BIOS calls. No backup RAM is present, so the calls
    /// report a formatted-but-empty cartridge.
    fn bram_call(&mut self, cpu: &mut dyn Cpu68000) {
        let command = cpu.get_data_register(0) & 0xffff;

        match command {
            0x00 => {
                // BRMINIT: formatted RAM is present, at the maximum
                // officially-allowed size.
                cpu.set_status_register(cpu.get_status_register() & !1);
                cpu.set_data_register(0, (cpu.get_data_register(0) & 0xffff_0000) | 0x100);
            }
            0x01 => {
                // BRMSTAT
                cpu.set_data_register(0, cpu.get_data_register(0) & 0xffff_0000);
                cpu.set_data_register(1, cpu.get_data_register(1) & 0xffff_0000);
            }
            0x02 => {
                // BRMSERCH: file not found.
                cpu.set_status_register(cpu.get_status_register() | 1);
            }
            0x03 => {
                // BRMREAD
                cpu.set_status_register(cpu.get_status_register() & !1);
                cpu.set_data_register(0, cpu.get_data_register(0) & 0xffff_0000);
                cpu.set_data_register(1, cpu.get_data_register(1) & 0xffff_ff00);
            }
            0x04 => {
                // BRMWRITE: error.
                cpu.set_status_register(cpu.get_status_register() | 1);
            }
            0x05 | 0x06 | 0x08 => {
                // BRMDEL, BRMFORMAT, BRMVERIFY: okay.
                cpu.set_status_register(cpu.get_status_register() & !1);
            }
            0x07 => {
                // BRMDIR: error.
                cpu.set_status_register(cpu.get_status_register() | 1);
            }
            _ => {
                warn!(target: "bus::sub", "Unrecognised BRAM call detected (0x{:02x})", command);
            }
        }
    }

    /// CD driver BIOS calls.
    fn mega_cd_bios_call(&mut self, cpu: &mut dyn Cpu68000, target_cycle: CycleMegaCd) {
        let command = cpu.get_data_register(0) & 0xffff;

        match command {
            0x20 => {
                // ROMREADN: begin buffering sectors.
                let parameters = cpu.get_address_register(0);
                let starting_sector = self.sub_read_longword(parameters, target_cycle);
                let total_sectors = self.sub_read_longword(parameters.wrapping_add(4), target_cycle);

                self.cd.clone().borrow_mut().seeked(starting_sector);
                self.mega_cd.cd.current_sector = starting_sector;
                self.mega_cd.cd.total_buffered_sectors = total_sectors;
            }
            0x8a => {
                // CDCSTAT: a sector is always ready.
                cpu.set_status_register(cpu.get_status_register() & !1);
            }
            0x8b => {
                // CDCREAD: prepare a sector, returning its header.
                if self.mega_cd.cd.total_buffered_sectors == 0 {
                    cpu.set_status_register(cpu.get_status_register() | 1);
                } else {
                    self.mega_cd.cd.total_buffered_sectors -= 1;
                    self.mega_cd.cd.cdc_ready = true;

                    cpu.set_status_register(cpu.get_status_register() & !1);
                    cpu.set_data_register(0, self.cd_sector_header());
                }
            }
            0x8c => {
                // CDCTRN: copy the prepared sector into memory.
                if !self.mega_cd.cd.cdc_ready {
                    cpu.set_status_register(cpu.get_status_register() | 1);
                } else {
                    let sector_bytes = self.cd.clone().borrow_mut().sector_read();
                    let sector_header = self.cd_sector_header();

                    self.mega_cd.cd.cdc_ready = false;
                    self.mega_cd.cd.current_sector += 1;

                    let destination = cpu.get_address_register(0);
                    let header_destination = cpu.get_address_register(1);

                    for i in (0..0x800).step_by(2) {
                        let word = BigEndian::read_u16(&sector_bytes[i..]);
                        self.sub_write_word(destination.wrapping_add(i as u32), word, target_cycle);
                    }

                    self.sub_write_longword(header_destination, sector_header, target_cycle);

                    cpu.set_address_register(0, destination.wrapping_add(0x800));
                    cpu.set_address_register(1, header_destination.wrapping_add(4));
                    cpu.set_status_register(cpu.get_status_register() & !1);
                }
            }
            0x8d => {
                // CDCACK
            }
            _ => {
                warn!(target: "bus::sub", "Unrecognised BIOS call detected (0x{:02x})", command);
            }
        }
    }
}
