// This file is part of cadmium.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::rc::Rc;

use bit_field::BitField;
use log::Level;

use crate::factory::VideoOutput;

use super::blit::{
    VdpConstant, SHADOW_HIGHLIGHT_HIGHLIGHT, SHADOW_HIGHLIGHT_NORMAL, SHADOW_HIGHLIGHT_SHADOW,
};

// SPEC: https://gendev.spritesmind.net/forum/viewtopic.php?p=21016#p21016

pub const MAX_SCANLINE_WIDTH: usize = 320;
/// V30 in double-resolution mode.
pub const MAX_SCANLINES: usize = 240 * 2;

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum SelectedBuffer {
    Vram,
    Cram,
    Vsram,
    Invalid,
}

#[derive(Copy, Clone, PartialEq)]
pub enum DmaMode {
    MemoryToVram,
    Fill,
    Copy,
}

#[derive(Copy, Clone, PartialEq)]
pub enum HscrollMode {
    Full,
    OneCell,
    OneLine,
}

#[derive(Copy, Clone, PartialEq)]
pub enum VscrollMode {
    Full,
    TwoCell,
}

#[derive(Clone, Default)]
pub struct VdpConfig {
    pub sprites_disabled: bool,
    pub window_disabled: bool,
    pub planes_disabled: [bool; 2],
}

pub(super) struct AccessState {
    pub write_pending: bool,
    pub address_register: u16,
    pub code_register: u16,
    pub increment: u16,
    pub selected_buffer: SelectedBuffer,
}

pub(super) struct DmaState {
    pub enabled: bool,
    pub mode: DmaMode,
    pub source_address_high: u8,
    pub source_address_low: u16,
    pub length: u16,
}

pub(super) struct WindowState {
    pub aligned_right: bool,
    pub aligned_bottom: bool,
    /// Measured in tiles.
    pub horizontal_boundary: u16,
    /// Measured in scanlines.
    pub vertical_boundary: u16,
}

#[derive(Copy, Clone)]
pub(super) struct CachedSprite {
    pub y: u16,
    pub width: u8,
    pub height: u8,
    pub link: u8,
}

#[derive(Copy, Clone, Default)]
pub(super) struct SpriteRowCacheEntry {
    pub table_index: u8,
    pub y_in_sprite: u8,
    pub width: u8,
    pub height: u8,
}

#[derive(Copy, Clone)]
pub(super) struct SpriteRowCacheRow {
    pub total: u8,
    pub sprites: [SpriteRowCacheEntry; 20],
}

impl Default for SpriteRowCacheRow {
    fn default() -> Self {
        SpriteRowCacheRow {
            total: 0,
            sprites: [SpriteRowCacheEntry::default(); 20],
        }
    }
}

pub(super) struct TileMetadata {
    pub tile_index: u16,
    pub palette_line: u8,
    pub x_flip: bool,
    pub y_flip: bool,
    pub priority: bool,
}

pub struct Vdp {
    // Dependencies
    pub(super) config: VdpConfig,
    pub(super) constant: Rc<VdpConstant>,
    // Access latch
    pub(super) access: AccessState,
    pub(super) dma: DmaState,
    // Plane/window configuration
    pub(super) plane_a_address: u16,
    pub(super) plane_b_address: u16,
    pub(super) window_address: u16,
    pub(super) sprite_table_address: u16,
    pub(super) hscroll_address: u16,
    pub(super) window: WindowState,
    pub(super) plane_width: u16,
    pub(super) plane_height: u16,
    // Display flags
    pub(super) display_enabled: bool,
    pub(super) v_int_enabled: bool,
    pub(super) h_int_enabled: bool,
    pub(super) h40_enabled: bool,
    pub(super) v30_enabled: bool,
    pub(super) shadow_highlight_enabled: bool,
    pub(super) double_resolution_enabled: bool,
    pub(super) background_colour: u8,
    pub(super) h_int_interval: u8,
    pub(super) currently_in_vblank: bool,
    pub(super) allow_sprite_masking: bool,
    pub(super) hscroll_mode: HscrollMode,
    pub(super) vscroll_mode: VscrollMode,
    // Memory
    pub(super) vram: Vec<u8>,
    pub(super) cram: [u16; 4 * 16],
    // Later models have 64 words of VSRAM; earlier ones only 40.
    pub(super) vsram: [u16; 64],
    // Sprite caches
    pub(super) sprite_table_cache: [[u8; 4]; 80],
    pub(super) sprite_row_cache_needs_updating: bool,
    pub(super) sprite_row_cache: Vec<SpriteRowCacheRow>,
    // Debug-string sink
    kdebug_buffer: [u8; 0x100],
    kdebug_buffer_index: usize,
}

impl Vdp {
    pub fn new(config: VdpConfig, constant: Rc<VdpConstant>) -> Self {
        info!(target: "video", "Initializing VDP");
        Vdp {
            config,
            constant,
            access: AccessState {
                write_pending: false,
                address_register: 0,
                code_register: 0,
                increment: 0,
                selected_buffer: SelectedBuffer::Vram,
            },
            dma: DmaState {
                enabled: false,
                mode: DmaMode::MemoryToVram,
                source_address_high: 0,
                source_address_low: 0,
                length: 0,
            },
            plane_a_address: 0,
            plane_b_address: 0,
            window_address: 0,
            sprite_table_address: 0,
            hscroll_address: 0,
            window: WindowState {
                aligned_right: false,
                aligned_bottom: false,
                horizontal_boundary: 0,
                vertical_boundary: 0,
            },
            plane_width: 32,
            plane_height: 32,
            display_enabled: false,
            v_int_enabled: false,
            h_int_enabled: false,
            h40_enabled: false,
            v30_enabled: false,
            shadow_highlight_enabled: false,
            double_resolution_enabled: false,
            background_colour: 0,
            h_int_interval: 0,
            currently_in_vblank: false,
            allow_sprite_masking: false,
            hscroll_mode: HscrollMode::Full,
            vscroll_mode: VscrollMode::Full,
            vram: vec![0; 0x10000],
            cram: [0; 4 * 16],
            vsram: [0; 64],
            sprite_table_cache: [[0; 4]; 80],
            sprite_row_cache_needs_updating: true,
            sprite_row_cache: vec![SpriteRowCacheRow::default(); MAX_SCANLINES],
            kdebug_buffer: [0; 0x100],
            kdebug_buffer_index: 0,
        }
    }

    pub fn reset(&mut self) {
        let config = self.config.clone();
        let constant = self.constant.clone();
        *self = Vdp::new(config, constant);
    }

    // -- Getters used by the bus and the frame driver

    pub fn is_v_int_enabled(&self) -> bool {
        self.v_int_enabled
    }

    pub fn is_h_int_enabled(&self) -> bool {
        self.h_int_enabled
    }

    pub fn get_h_int_interval(&self) -> u8 {
        self.h_int_interval
    }

    pub fn is_double_resolution(&self) -> bool {
        self.double_resolution_enabled
    }

    pub fn set_vblank(&mut self, vblank: bool) {
        self.currently_in_vblank = vblank;
    }

    /// Active display height in scanlines, before double-resolution
    /// doubling.
    pub fn get_visible_scanlines(&self) -> u16 {
        if self.v30_enabled {
            240
        } else {
            224
        }
    }

    fn tile_height_power(&self) -> u16 {
        if self.double_resolution_enabled {
            4
        } else {
            3
        }
    }

    pub(super) fn screen_width(&self) -> usize {
        if self.h40_enabled {
            40 * 8
        } else {
            32 * 8
        }
    }

    pub(super) fn screen_height(&self) -> usize {
        (if self.v30_enabled { 30 } else { 28 }) << self.tile_height_power()
    }

    // -- Memory helpers

    /// VRAM is byte-addressed with big-endian word access.
    pub(super) fn read_vram_word(&self, address: usize) -> u16 {
        let high = self.vram[address % self.vram.len()];
        let low = self.vram[(address ^ 1) % self.vram.len()];
        (u16::from(high) << 8) | u16::from(low)
    }

    pub(super) fn decompose_tile_metadata(packed: u16) -> TileMetadata {
        TileMetadata {
            tile_index: packed & 0x7ff,
            palette_line: ((packed >> 13) & 3) as u8,
            x_flip: packed & 0x800 != 0,
            y_flip: packed & 0x1000 != 0,
            priority: packed & 0x8000 != 0,
        }
    }

    pub(super) fn get_cached_sprite(&self, sprite_index: usize) -> CachedSprite {
        let bytes = &self.sprite_table_cache[sprite_index];
        CachedSprite {
            y: (u16::from(bytes[0] & 3) << 8) | u16::from(bytes[1]),
            width: ((bytes[2] >> 2) & 3) + 1,
            height: (bytes[2] & 3) + 1,
            link: bytes[3] & 0x7f,
        }
    }

    fn write_vram(&mut self, index: usize, value: u8) {
        let index_wrapped = index % self.vram.len();

        // Writes into the sprite table are mirrored into the sprite
        // table cache.
        let sprite_table_index = index_wrapped.wrapping_sub(usize::from(self.sprite_table_address));
        let max_sprites = if self.h40_enabled { 80 } else { 64 };

        if sprite_table_index < max_sprites * 8 && sprite_table_index & 4 == 0 {
            self.sprite_table_cache[sprite_table_index / 8][sprite_table_index & 3] = value;
            self.sprite_row_cache_needs_updating = true;
        }

        self.vram[index_wrapped] = value;
    }

    // -- Access latch helpers

    fn is_dma_pending(&self) -> bool {
        self.access.code_register & 0x20 != 0
    }

    fn clear_dma_pending(&mut self) {
        self.access.code_register &= !0x20;
    }

    fn is_in_read_mode(&self) -> bool {
        self.access.code_register & 1 == 0
    }

    fn write_and_increment(&mut self, value: u16, video: &mut dyn VideoOutput) {
        match self.access.selected_buffer {
            SelectedBuffer::Vram => {
                let address = usize::from(self.access.address_register);
                self.write_vram(address, (value >> 8) as u8);
                self.write_vram(address ^ 1, (value & 0xff) as u8);
            }
            SelectedBuffer::Cram => {
                // Remove garbage bits.
                let colour = value & 0xeee;
                let index_wrapped = usize::from(self.access.address_register / 2) % self.cram.len();

                self.cram[index_wrapped] = colour;

                // Precompute the normal/shadow/highlight colours in
                // 12-bit BGR and hand them to the front-end, so the
                // blitter never has to derive them per pixel.

                // Normal: repeat the upper bit in the lower bit so that
                // the full 4-bit colour range is covered.
                video.colour_updated(
                    usize::from(SHADOW_HIGHLIGHT_NORMAL) + index_wrapped,
                    colour | ((colour & 0x888) >> 3),
                );
                // Shadow: half brightness, lower half of the range.
                video.colour_updated(
                    usize::from(SHADOW_HIGHLIGHT_SHADOW) + index_wrapped,
                    colour >> 1,
                );
                // Highlight: half brightness, upper half of the range.
                video.colour_updated(
                    usize::from(SHADOW_HIGHLIGHT_HIGHLIGHT) + index_wrapped,
                    0x888 + (colour >> 1),
                );
            }
            SelectedBuffer::Vsram => {
                let index = usize::from(self.access.address_register / 2) % self.vsram.len();
                self.vsram[index] = value & 0x7ff;
            }
            SelectedBuffer::Invalid => {
                warn!(
                    target: "vdp",
                    "VDP write attempted with invalid access mode specified (0x{:02x})",
                    self.access.code_register
                );
            }
        }

        self.access.address_register = self
            .access
            .address_register
            .wrapping_add(self.access.increment);
    }

    fn read_and_increment(&mut self) -> u16 {
        let value = match self.access.selected_buffer {
            SelectedBuffer::Vram => {
                self.read_vram_word(usize::from(self.access.address_register))
            }
            SelectedBuffer::Cram => {
                self.cram[usize::from(self.access.address_register / 2) % self.cram.len()]
            }
            SelectedBuffer::Vsram => {
                self.vsram[usize::from(self.access.address_register / 2) % self.vsram.len()]
            }
            SelectedBuffer::Invalid => {
                warn!(
                    target: "vdp",
                    "VDP read attempted with invalid access mode specified (0x{:02x})",
                    self.access.code_register
                );
                0
            }
        };

        self.access.address_register = self
            .access
            .address_register
            .wrapping_add(self.access.increment);

        value
    }

    // -- Port operations

    pub fn read_data(&mut self) -> u16 {
        self.access.write_pending = false;

        if !self.is_in_read_mode() {
            // Real hardware hangs the main CPU here; the address still
            // advances, but nothing is read.
            warn!(target: "vdp", "Data was read from the VDP data port while the VDP was in write mode");
            self.access.address_register = self
                .access
                .address_register
                .wrapping_add(self.access.increment);
            return 0;
        }

        self.read_and_increment()
    }

    pub fn read_control(&mut self) -> u16 {
        // The FIFO-empty and H-blank bits are forced so that software
        // polling them makes progress.
        let currently_in_hblank = true;
        let fifo_empty = true;

        // Reading the control port aborts a partially written command.
        // The official boot code relies on this even though the SDK
        // manuals do not document it.
        self.access.write_pending = false;

        0x3400
            | (u16::from(fifo_empty) << 9)
            | (u16::from(self.currently_in_vblank) << 3)
            | (u16::from(currently_in_hblank) << 2)
    }

    pub fn write_data(&mut self, value: u16, video: &mut dyn VideoOutput) {
        self.access.write_pending = false;

        if self.is_in_read_mode() {
            // Invalid input, but defined behaviour: the address is
            // incremented, but nothing is stored.
            warn!(target: "vdp", "Data was written to the VDP data port while the VDP was in read mode");
            self.access.address_register = self
                .access
                .address_register
                .wrapping_add(self.access.increment);
            return;
        }

        self.write_and_increment(value, video);

        if self.is_dma_pending() {
            // Perform a DMA fill.
            self.clear_dma_pending();

            loop {
                let address = usize::from(self.access.address_register) ^ 1;
                self.write_vram(address, (value >> 8) as u8);
                self.access.address_register = self
                    .access
                    .address_register
                    .wrapping_add(self.access.increment);

                // Even fills increment the low source address,
                // replicating the 128 KiB source wrap-around bug.
                self.dma.source_address_low = self.dma.source_address_low.wrapping_add(1);

                self.dma.length = self.dma.length.wrapping_sub(1);
                if self.dma.length == 0 {
                    break;
                }
            }
        }
    }

    /// Second halves of access commands may fire a memory-to-VRAM DMA,
    /// which needs the main bus; the caller runs that transfer through
    /// [`Vdp::dma_source_address`] and [`Vdp::dma_write_and_advance`]
    /// when this returns `true`.
    pub fn write_control(&mut self, value: u16, video: &mut dyn VideoOutput) -> bool {
        if self.access.write_pending {
            // This is an "address set" command (part 2).
            let code_bitmask: u16 = if self.dma.enabled { 0x3c } else { 0x1c };

            self.access.write_pending = false;
            self.access.address_register =
                (self.access.address_register & 0x3fff) | ((value & 3) << 14);
            self.access.code_register =
                (self.access.code_register & !code_bitmask) | ((value >> 2) & code_bitmask);
        } else if value & 0xc000 == 0x8000 {
            // This is a "register set" command.
            // Clearing the code register here is relied upon by Sonic 3D
            // Blast's opening FMV.
            self.access.code_register = 0;
            self.write_register(((value >> 8) & 0x1f) as u8, (value & 0xff) as u8, video);
        } else {
            // This is an "address set" command (part 1).
            self.access.write_pending = true;
            self.access.address_register =
                (value & 0x3fff) | (self.access.address_register & (3 << 14));
            self.access.code_register = ((value >> 14) & 3) | (self.access.code_register & 0x3c);
        }

        self.access.selected_buffer = match (self.access.code_register >> 1) & 7 {
            0 => SelectedBuffer::Vram,
            // CRAM has distinct read and write codes.
            1 | 4 => SelectedBuffer::Cram,
            2 => SelectedBuffer::Vsram,
            _ => SelectedBuffer::Invalid,
        };

        if self.is_dma_pending() && self.dma.mode != DmaMode::Fill {
            self.clear_dma_pending();

            if self.dma.mode == DmaMode::MemoryToVram {
                return true;
            }

            // VRAM-to-VRAM copy runs in place.
            loop {
                let value = self.vram[usize::from(self.dma.source_address_low ^ 1)];
                let address = usize::from(self.access.address_register) ^ 1;
                self.write_vram(address, value);
                self.access.address_register = self
                    .access
                    .address_register
                    .wrapping_add(self.access.increment);

                self.dma.source_address_low = self.dma.source_address_low.wrapping_add(1);
                self.dma.length = self.dma.length.wrapping_sub(1);
                if self.dma.length == 0 {
                    break;
                }
            }
        }

        false
    }

    /// Byte address on the main bus that the next memory-to-VRAM DMA word
    /// comes from.
    pub fn dma_source_address(&self) -> u32 {
        (u32::from(self.dma.source_address_high) << 17)
            | (u32::from(self.dma.source_address_low) << 1)
    }

    /// Pipes one fetched word through the normal write path (so CRAM
    /// recolouring happens) and advances the transfer. Returns `true`
    /// when the transfer is complete.
    pub fn dma_write_and_advance(&mut self, value: u16, video: &mut dyn VideoOutput) -> bool {
        self.write_and_increment(value, video);

        // The low source address wraps at 16 bits, replicating the
        // 128 KiB wrap-around bug.
        self.dma.source_address_low = self.dma.source_address_low.wrapping_add(1);
        self.dma.length = self.dma.length.wrapping_sub(1);
        self.dma.length == 0
    }

    // -- Register file

    fn write_register(&mut self, reg: u8, data: u8, video: &mut dyn VideoOutput) {
        if log_enabled!(Level::Trace) {
            trace!(target: "vdp::reg", "Write {} = 0x{:02x}", reg, data);
        }
        match reg {
            0 => {
                // MODE SET REGISTER NO.1
                self.h_int_enabled = data.get_bit(4);
            }
            1 => {
                // MODE SET REGISTER NO.2
                self.display_enabled = data.get_bit(6);
                self.v_int_enabled = data.get_bit(5);
                self.dma.enabled = data.get_bit(4);
                self.v30_enabled = data.get_bit(3);
            }
            2 => {
                // PATTERN NAME TABLE BASE ADDRESS FOR SCROLL A
                self.plane_a_address = u16::from(data & 0x38) << 10;
            }
            3 => {
                // PATTERN NAME TABLE BASE ADDRESS FOR WINDOW
                self.window_address = u16::from(data & 0x3e) << 10;
            }
            4 => {
                // PATTERN NAME TABLE BASE ADDRESS FOR SCROLL B
                self.plane_b_address = u16::from(data & 7) << 13;
            }
            5 => {
                // SPRITE ATTRIBUTE TABLE BASE ADDRESS
                self.sprite_table_address = u16::from(data & 0x7f) << 9;
                // Real VDPs do not refresh the sprite cache here; they
                // keep the stale mirror until the table is written again.
            }
            7 => {
                // BACKGROUND COLOR
                self.background_colour = data & 0x3f;
            }
            10 => {
                // H INTERRUPT REGISTER
                self.h_int_interval = data;
            }
            11 => {
                // MODE SET REGISTER NO.3
                self.vscroll_mode = if data & 4 != 0 {
                    VscrollMode::TwoCell
                } else {
                    VscrollMode::Full
                };
                match data & 3 {
                    0 => self.hscroll_mode = HscrollMode::Full,
                    1 => {
                        warn!(target: "vdp::reg", "Prohibited H-scroll mode selected");
                    }
                    2 => self.hscroll_mode = HscrollMode::OneCell,
                    _ => self.hscroll_mode = HscrollMode::OneLine,
                }
            }
            12 => {
                // MODE SET REGISTER NO.4
                self.h40_enabled = data.get_bit(7) || data.get_bit(0);
                self.shadow_highlight_enabled = data.get_bit(3);
                // Only interlace mode 2 doubles the vertical resolution;
                // the other three settings display 240p-style fields.
                self.double_resolution_enabled = data.get_bits(1..3) == 3;
            }
            13 => {
                // H SCROLL DATA TABLE BASE ADDRESS
                self.hscroll_address = u16::from(data & 0x3f) << 10;
            }
            15 => {
                // AUTO INCREMENT DATA
                self.access.increment = u16::from(data);
            }
            16 => {
                // SCROLL SIZE
                let width_index = data & 3;
                let height_index = (data >> 4) & 3;

                if (width_index == 3 && height_index != 0)
                    || (height_index == 3 && width_index != 0)
                {
                    warn!(target: "vdp::reg", "Selected plane size exceeds 64x64/32x128/128x32");
                } else {
                    match width_index {
                        0 => self.plane_width = 32,
                        1 => self.plane_width = 64,
                        2 => {
                            warn!(target: "vdp::reg", "Prohibited plane width selected");
                        }
                        _ => self.plane_width = 128,
                    }
                    match height_index {
                        0 => self.plane_height = 32,
                        1 => self.plane_height = 64,
                        2 => {
                            warn!(target: "vdp::reg", "Prohibited plane height selected");
                        }
                        _ => self.plane_height = 128,
                    }
                }
            }
            17 => {
                // WINDOW H POSITION
                self.window.aligned_right = data.get_bit(7);
                self.window.horizontal_boundary = u16::from(data & 0x1f) * 2;
            }
            18 => {
                // WINDOW V POSITION
                self.window.aligned_bottom = data.get_bit(7);
                self.window.vertical_boundary = u16::from(data & 0x1f) * 8;
            }
            19 => {
                // DMA LENGTH COUNTER LOW
                self.dma.length = (self.dma.length & 0xff00) | u16::from(data);
            }
            20 => {
                // DMA LENGTH COUNTER HIGH
                self.dma.length = (self.dma.length & 0x00ff) | (u16::from(data) << 8);
            }
            21 => {
                // DMA SOURCE ADDRESS LOW
                self.dma.source_address_low =
                    (self.dma.source_address_low & 0xff00) | u16::from(data);
            }
            22 => {
                // DMA SOURCE ADDRESS MID
                self.dma.source_address_low =
                    (self.dma.source_address_low & 0x00ff) | (u16::from(data) << 8);
            }
            23 => {
                // DMA SOURCE ADDRESS HIGH, including the mode select.
                if data.get_bit(7) {
                    self.dma.source_address_high = data & 0x3f;
                    self.dma.mode = if data.get_bit(6) {
                        DmaMode::Copy
                    } else {
                        DmaMode::Fill
                    };
                } else {
                    self.dma.source_address_high = data & 0x7f;
                    self.dma.mode = DmaMode::MemoryToVram;
                }
            }
            30 => {
                // Gens KMod debug register. Does not exist on real
                // hardware, but is a useful emulator feature.
                let character = data as i8;

                if i32::from(character) < 0x20 && character != 0 {
                    return;
                }

                self.kdebug_buffer[self.kdebug_buffer_index] = data;
                self.kdebug_buffer_index += 1;

                if character == 0 || self.kdebug_buffer_index == self.kdebug_buffer.len() - 1 {
                    let length = self
                        .kdebug_buffer
                        .iter()
                        .position(|&byte| byte == 0)
                        .unwrap_or(self.kdebug_buffer.len() - 1);
                    let message = String::from_utf8_lossy(&self.kdebug_buffer[..length]).into_owned();
                    self.kdebug_buffer_index = 0;
                    video.kdebug(&message);
                }
            }
            6 | 8 | 9 | 14 => {
                // Unused legacy register.
            }
            _ => {
                warn!(target: "vdp::reg", "Attempted to set invalid VDP register ({})", reg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullVideo {
        colours: Vec<(usize, u16)>,
        kdebug_messages: Vec<String>,
    }

    impl NullVideo {
        fn new() -> Self {
            NullVideo {
                colours: Vec::new(),
                kdebug_messages: Vec::new(),
            }
        }
    }

    impl VideoOutput for NullVideo {
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
        }

        fn kdebug(&mut self, message: &str) {
            self.kdebug_messages.push(message.to_string());
        }
    }

    fn setup_vdp() -> Vdp {
        Vdp::new(VdpConfig::default(), Rc::new(VdpConstant::new()))
    }

    fn write_register(vdp: &mut Vdp, reg: u16, data: u16) {
        let mut video = NullVideo::new();
        vdp.write_control(0x8000 | (reg << 8) | data, &mut video);
    }

    #[test]
    fn two_part_command_assembles_address_and_code() {
        let mut vdp = setup_vdp();
        let mut video = NullVideo::new();
        vdp.write_control(0x4123, &mut video);
        assert_eq!(true, vdp.access.write_pending);
        assert_eq!(0x0123, vdp.access.address_register);
        assert_eq!(1, vdp.access.code_register);
        vdp.write_control(0x0002, &mut video);
        assert_eq!(false, vdp.access.write_pending);
        assert_eq!(0x8123, vdp.access.address_register);
        assert_eq!(SelectedBuffer::Vram, vdp.access.selected_buffer);
    }

    #[test]
    fn selected_buffer_follows_code_register() {
        let mut vdp = setup_vdp();
        let mut video = NullVideo::new();
        // CRAM write: code 0b0011.
        vdp.write_control(0xc000, &mut video);
        vdp.write_control(0x0000, &mut video);
        assert_eq!(SelectedBuffer::Cram, vdp.access.selected_buffer);
        // VSRAM write: code 0b0101.
        vdp.write_control(0x4000, &mut video);
        vdp.write_control(0x0010, &mut video);
        assert_eq!(SelectedBuffer::Vsram, vdp.access.selected_buffer);
    }

    #[test]
    fn control_read_clears_write_pending() {
        let mut vdp = setup_vdp();
        let mut video = NullVideo::new();
        vdp.write_control(0x4000, &mut video);
        assert_eq!(true, vdp.access.write_pending);
        vdp.read_control();
        assert_eq!(false, vdp.access.write_pending);
    }

    #[test]
    fn vram_write_read_round_trip() {
        let mut vdp = setup_vdp();
        let mut video = NullVideo::new();
        write_register(&mut vdp, 15, 2);
        // VRAM write to 0x0100.
        vdp.write_control(0x4100, &mut video);
        vdp.write_control(0x0000, &mut video);
        vdp.write_data(0xbeef, &mut video);
        // VRAM read from 0x0100.
        vdp.write_control(0x0100, &mut video);
        vdp.write_control(0x0000, &mut video);
        assert_eq!(0xbeef, vdp.read_data());
    }

    #[test]
    fn cram_write_dispatches_three_palette_entries() {
        let mut vdp = setup_vdp();
        let mut video = NullVideo::new();
        vdp.write_control(0xc000, &mut video);
        vdp.write_control(0x0000, &mut video);
        vdp.write_data(0x0eee, &mut video);
        assert_eq!(
            vec![(0x00, 0x0fff), (0x40, 0x0777), (0x80, 0x0fff)],
            video.colours
        );
    }

    #[test]
    fn data_read_in_write_mode_only_increments() {
        let mut vdp = setup_vdp();
        let mut video = NullVideo::new();
        write_register(&mut vdp, 15, 2);
        vdp.vram[0x40] = 0xab;
        vdp.write_control(0x4040, &mut video);
        vdp.write_control(0x0000, &mut video);
        assert_eq!(0, vdp.read_data());
        assert_eq!(0x42, vdp.access.address_register);
    }

    #[test]
    fn data_write_in_read_mode_only_increments() {
        let mut vdp = setup_vdp();
        let mut video = NullVideo::new();
        write_register(&mut vdp, 15, 2);
        vdp.write_control(0x0000, &mut video);
        vdp.write_control(0x0000, &mut video);
        vdp.write_data(0x1234, &mut video);
        assert_eq!(0, vdp.vram[0]);
        assert_eq!(2, vdp.access.address_register);
    }

    #[test]
    fn dma_fill_writes_high_byte_and_wraps_source() {
        let mut vdp = setup_vdp();
        let mut video = NullVideo::new();
        write_register(&mut vdp, 1, 1 << 4); // DMA enable
        write_register(&mut vdp, 15, 1); // increment 1
        write_register(&mut vdp, 19, 4); // length 4
        write_register(&mut vdp, 23, 0x80); // fill mode
        let source_before = vdp.dma.source_address_low;
        // Address 0x0100, code 0x21 (VRAM write with DMA pending).
        vdp.write_control(0x4100, &mut video);
        vdp.write_control(0x0080, &mut video);
        vdp.write_data(0xaa00, &mut video);
        // The triggering write stores the full word at 0x100, then the
        // fill walks its high byte through address ^ 1.
        assert_eq!(0xaa, vdp.vram[0x100]);
        assert_eq!(0x00, vdp.vram[0x101]);
        assert_eq!(0xaa, vdp.vram[0x102]);
        assert_eq!(0xaa, vdp.vram[0x103]);
        assert_eq!(0x00, vdp.vram[0x104]);
        assert_eq!(0xaa, vdp.vram[0x105]);
        assert_eq!(source_before.wrapping_add(4), vdp.dma.source_address_low);
        assert_eq!(0, vdp.access.code_register & 0x20);
    }

    #[test]
    fn dma_copy_moves_vram_bytes() {
        let mut vdp = setup_vdp();
        let mut video = NullVideo::new();
        write_register(&mut vdp, 1, 1 << 4);
        write_register(&mut vdp, 15, 1);
        write_register(&mut vdp, 19, 2); // length 2
        vdp.vram[0x11] = 0x12;
        vdp.vram[0x10] = 0x34;
        write_register(&mut vdp, 21, 0x10); // source low
        write_register(&mut vdp, 22, 0x00);
        write_register(&mut vdp, 23, 0x80 | 0x40); // copy mode
        // Destination 0x200, code with DMA bit.
        vdp.write_control(0x4200, &mut video);
        vdp.write_control(0x0080, &mut video);
        assert_eq!(0x12, vdp.vram[0x201]);
        assert_eq!(0x34, vdp.vram[0x200]);
    }

    #[test]
    fn register_set_clears_code_register() {
        let mut vdp = setup_vdp();
        let mut video = NullVideo::new();
        vdp.write_control(0xc000, &mut video);
        vdp.write_control(0x0000, &mut video);
        assert_eq!(SelectedBuffer::Cram, vdp.access.selected_buffer);
        write_register(&mut vdp, 7, 0x15);
        assert_eq!(0, vdp.access.code_register);
        assert_eq!(SelectedBuffer::Vram, vdp.access.selected_buffer);
        assert_eq!(0x15, vdp.background_colour);
    }

    #[test]
    fn dma_length_zero_means_65536() {
        let mut vdp = setup_vdp();
        let mut video = NullVideo::new();
        write_register(&mut vdp, 1, 1 << 4);
        write_register(&mut vdp, 15, 1);
        // Length registers untouched: length == 0.
        write_register(&mut vdp, 23, 0x80);
        vdp.write_control(0x4000, &mut video);
        vdp.write_control(0x0080, &mut video);
        vdp.write_data(0x5500, &mut video);
        // The fill wrapped through the entire VRAM.
        for i in 0..0x10000 {
            assert_eq!(0x55, vdp.vram[i], "at index {}", i);
        }
        assert_eq!(0, vdp.dma.length);
    }

    #[test]
    fn sprite_table_writes_update_cache() {
        let mut vdp = setup_vdp();
        let mut video = NullVideo::new();
        write_register(&mut vdp, 5, 0x01); // sprite table at 0x200
        write_register(&mut vdp, 15, 2);
        vdp.write_control(0x4200, &mut video);
        vdp.write_control(0x0000, &mut video);
        vdp.sprite_row_cache_needs_updating = false;
        vdp.write_data(0x0123, &mut video); // Y
        vdp.write_data(0x0545, &mut video); // size and link
        assert_eq!(true, vdp.sprite_row_cache_needs_updating);
        assert_eq!([0x01, 0x23, 0x05, 0x45], vdp.sprite_table_cache[0]);
        let sprite = vdp.get_cached_sprite(0);
        assert_eq!(0x123, sprite.y);
        assert_eq!(2, sprite.width);
        assert_eq!(2, sprite.height);
        assert_eq!(0x45, sprite.link);
    }

    #[test]
    fn kdebug_flushes_on_nul() {
        let mut vdp = setup_vdp();
        let mut video = NullVideo::new();
        for &byte in b"hi" {
            vdp.write_control(0x9e00 | u16::from(byte), &mut video);
        }
        vdp.write_control(0x9e00, &mut video);
        assert_eq!(vec!["hi".to_string()], video.kdebug_messages);
    }

    #[test]
    fn invalid_plane_size_is_rejected() {
        let mut vdp = setup_vdp();
        write_register(&mut vdp, 16, 0x13); // 128x64: prohibited
        assert_eq!(32, vdp.plane_width);
        assert_eq!(32, vdp.plane_height);
        write_register(&mut vdp, 16, 0x03); // 128x32
        assert_eq!(128, vdp.plane_width);
        assert_eq!(32, vdp.plane_height);
    }
}
