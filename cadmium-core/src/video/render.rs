// This file is part of cadmium.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use crate::factory::VideoOutput;

use super::vdp::{HscrollMode, Vdp, VscrollMode, MAX_SCANLINES, MAX_SCANLINE_WIDTH};

const MAX_SPRITE_WIDTH: usize = 8 * 4;
const EXTRA_TILES: usize = 2;
const TILE_COLUMNS: usize = MAX_SCANLINE_WIDTH / 8;

// The original hardware has a bug where using V-scroll and H-scroll at
// the same time makes the partially off-screen leftmost column use an
// invalid V-scroll value. To simulate this, 16 extra pixels are rendered
// on the left side of the scanline; depending on the H-scroll value they
// may slide into view. The buffer carries 16 bytes of padding at the
// start for them, and 15 bytes at the end because tiles are always
// rendered at their full width, on-screen or not.
const PLANE_BUFFER_SIZE: usize = 16 + TILE_COLUMNS * 8 + 15;
const SPRITE_BUFFER_SIZE: usize = (MAX_SPRITE_WIDTH - 1) + MAX_SCANLINE_WIDTH + (MAX_SPRITE_WIDTH - 1);

impl Vdp {
    fn render_tile(
        &self,
        pixel_y_in_plane: usize,
        tile_x: usize,
        tile_y: usize,
        plane_address: usize,
        plane_width: usize,
        tile_height_mask: usize,
        tile_size: usize,
        metapixels: &mut [u8; PLANE_BUFFER_SIZE],
        cursor: &mut usize,
    ) {
        let tile = Self::decompose_tile_metadata(
            self.read_vram_word(plane_address + (tile_y * plane_width + tile_x) * 2),
        );

        let y_flip_mask = if tile.y_flip { tile_height_mask } else { 0 };
        let pixel_y_in_tile = (pixel_y_in_plane & tile_height_mask) ^ y_flip_mask;

        // The raw tile row that contains the desired metapixels.
        let tile_data = (usize::from(tile.tile_index) * tile_size + pixel_y_in_tile * 4)
            % self.vram.len();

        let byte_index_xor = if tile.x_flip { 7 } else { 0 };
        let metapixel_upper_bits = (u8::from(tile.priority) << 2) | tile.palette_line;

        let blit_lookup = &self.constant.blit_lookup[usize::from(metapixel_upper_bits)];

        for i in 0..8 {
            let pixel_x_in_tile = i ^ byte_index_xor;

            let nibble_shift = (!pixel_x_in_tile & 1) << 2;
            let palette_line_index =
                (self.vram[(tile_data + pixel_x_in_tile / 2) % self.vram.len()] >> nibble_shift) & 0xf;

            metapixels[*cursor] =
                blit_lookup[usize::from(metapixels[*cursor])][usize::from(palette_line_index)];
            *cursor += 1;
        }
    }

    fn update_sprite_row_cache(&mut self) {
        // Caching and preprocessing part of the sprite table lets the
        // renderer avoid walking the whole table for every scanline. The
        // real VDP partially caches its sprite table too.
        let max_sprites: usize = if self.h40_enabled { 80 } else { 64 };
        let row_limit: u8 = if self.h40_enabled { 20 } else { 16 };
        let tile_height_power = if self.double_resolution_enabled { 4 } else { 3 };
        let blank_lines: usize = 128 << usize::from(self.double_resolution_enabled);
        let visible_lines: usize =
            (if self.v30_enabled { 30 } else { 28 }) << tile_height_power;

        self.sprite_row_cache_needs_updating = false;

        for row in self.sprite_row_cache.iter_mut() {
            row.total = 0;
        }

        let mut sprite_index = 0;
        let mut sprites_remaining = max_sprites;

        loop {
            let cached_sprite = self.get_cached_sprite(sprite_index);
            let y = usize::from(cached_sprite.y);
            let height_in_lines = usize::from(cached_sprite.height) << tile_height_power;

            // Only rows that land on-screen are cached.
            let first = blank_lines.max(y);
            let last = (blank_lines + visible_lines).min(y + height_in_lines);

            for line in first..last {
                let row = &mut self.sprite_row_cache[line - blank_lines];

                // Don't cache more sprites than can be drawn on one line.
                if row.total != row_limit {
                    let entry = &mut row.sprites[usize::from(row.total)];
                    row.total += 1;
                    entry.table_index = sprite_index as u8;
                    entry.width = cached_sprite.width;
                    entry.height = cached_sprite.height;
                    entry.y_in_sprite = (line - y) as u8;
                }
            }

            if usize::from(cached_sprite.link) >= max_sprites {
                // An out-of-range link terminates the walk early; this is
                // what real hardware does as well.
                break;
            }

            sprite_index = usize::from(cached_sprite.link);
            sprites_remaining -= 1;
            if sprite_index == 0 || sprites_remaining == 0 {
                break;
            }
        }
    }

    fn render_sprites(
        &mut self,
        scanline: usize,
        sprite_metapixels: &mut [[u8; 2]; SPRITE_BUFFER_SIZE],
    ) {
        let tile_height_power = if self.double_resolution_enabled { 4 } else { 3 };
        let tile_height_mask = (1 << tile_height_power) - 1;
        let tile_size = (8 << tile_height_power) / 2;

        let mut sprite_limit: usize = if self.h40_enabled { 20 } else { 16 };
        let mut pixel_limit: usize = if self.h40_enabled { 320 } else { 256 };
        let screen_width = self.screen_width();

        let mut masked = false;
        let mut pixel_limit_reached = false;

        // Verified against Nemesis's sprite masking and overflow test ROM.
        'sprites: for i in 0..usize::from(self.sprite_row_cache[scanline].total) {
            let entry = self.sprite_row_cache[scanline].sprites[i];

            let sprite_address = usize::from(self.sprite_table_address) + usize::from(entry.table_index) * 8;
            let width = usize::from(entry.width);
            let height = usize::from(entry.height);
            let tile = Self::decompose_tile_metadata(self.read_vram_word(sprite_address + 4));
            let x = usize::from(self.read_vram_word(sprite_address + 6) & 0x1ff);

            let metapixel_high_bits = (u8::from(tile.priority) << 2) | tile.palette_line;

            if x == 0 {
                // A masking sprite suppresses all remaining sprites on
                // the line, but only once an earlier sprite has drawn.
                masked = self.allow_sprite_masking;
            } else {
                self.allow_sprite_masking = true;
            }

            if masked || x + width * 8 <= 0x80 || x >= 0x80 + screen_width {
                // Skipped sprites still consume pixel budget.
                if pixel_limit <= width * 8 {
                    pixel_limit_reached = true;
                    break 'sprites;
                }
                pixel_limit -= width * 8;
            } else {
                let mut cursor = (MAX_SPRITE_WIDTH - 1) + x - 0x80;

                let y_in_sprite = if tile.y_flip {
                    (height << tile_height_power) - usize::from(entry.y_in_sprite) - 1
                } else {
                    usize::from(entry.y_in_sprite)
                };

                let x_flip_xor = if tile.x_flip { 7 } else { 0 };

                for j in 0..width {
                    let x_in_sprite = if tile.x_flip { width - j - 1 } else { j };
                    let tile_index = usize::from(tile.tile_index)
                        + (y_in_sprite >> tile_height_power)
                        + x_in_sprite * height;
                    let pixel_y_in_tile = y_in_sprite & tile_height_mask;

                    let tile_data = (tile_index * tile_size + pixel_y_in_tile * 4) % self.vram.len();

                    for k in 0..8 {
                        let pixel_x_in_tile = k ^ x_flip_xor;

                        let nibble_shift = (!pixel_x_in_tile & 1) << 2;
                        let palette_line_index = (self.vram
                            [(tile_data + pixel_x_in_tile / 2) % self.vram.len()]
                            >> nibble_shift)
                            & 0xf;

                        // Only unclaimed, non-transparent pixels land.
                        let mask = if sprite_metapixels[cursor][1] == 0 && palette_line_index != 0 {
                            0xff
                        } else {
                            0
                        };

                        sprite_metapixels[cursor][0] |= metapixel_high_bits & mask;
                        sprite_metapixels[cursor][1] |= palette_line_index & mask;
                        cursor += 1;

                        pixel_limit -= 1;
                        if pixel_limit == 0 {
                            pixel_limit_reached = true;
                            break 'sprites;
                        }
                    }
                }
            }

            sprite_limit -= 1;
            if sprite_limit == 0 {
                break;
            }
        }

        // Sprite masking is only re-armed when the scanline ends without
        // exhausting the pixel budget.
        if !pixel_limit_reached {
            self.allow_sprite_masking = false;
        }
    }

    pub fn render_scanline(&mut self, scanline: usize, video: &mut dyn VideoOutput) {
        assert!(scanline < MAX_SCANLINES);

        let tile_height_power: usize = if self.double_resolution_enabled { 4 } else { 3 };

        let mut plane_metapixels = [self.background_colour; PLANE_BUFFER_SIZE];

        if self.display_enabled {
            let tile_height_mask = (1 << tile_height_power) - 1;
            let tile_size = (8 << tile_height_power) / 2;

            let plane_width = usize::from(self.plane_width);
            let plane_height = usize::from(self.plane_height);
            let window_plane_width: usize = if self.h40_enabled { 64 } else { 32 };
            let window_plane_height: usize = 32;

            // Draw the background planes, B first so that A composites
            // on top.
            for i in (0..2).rev() {
                // Plane A gives way to the window plane on scanlines
                // inside the window's vertical extent.
                let rendering_window_plane = i == 0
                    && ((scanline < usize::from(self.window.vertical_boundary))
                        != self.window.aligned_bottom)
                    && !self.config.window_disabled;

                let (effective_width, effective_height) = if rendering_window_plane {
                    (window_plane_width, window_plane_height)
                } else {
                    (plane_width, plane_height)
                };

                if !rendering_window_plane && self.config.planes_disabled[i] {
                    continue;
                }

                let hscroll: usize = if rendering_window_plane {
                    0
                } else {
                    let hscroll_address = usize::from(self.hscroll_address);
                    let line_shift: usize = if self.double_resolution_enabled { 1 } else { 0 };
                    let word = match self.hscroll_mode {
                        HscrollMode::Full => self.read_vram_word(hscroll_address + i * 2),
                        HscrollMode::OneCell => self.read_vram_word(
                            hscroll_address
                                + (scanline >> tile_height_power << tile_height_power) * 4
                                + i * 2,
                        ),
                        HscrollMode::OneLine => self.read_vram_word(
                            hscroll_address + (scanline >> line_shift) * 4 + i * 2,
                        ),
                    };
                    usize::from(word)
                };

                let plane_width_bitmask = effective_width - 1;
                let plane_height_bitmask = effective_height - 1;

                let plane_address = usize::from(if i == 0 {
                    if rendering_window_plane {
                        self.window_address
                    } else {
                        self.plane_a_address
                    }
                } else {
                    self.plane_b_address
                });

                // Offset into the metapixel buffer, and the matching
                // offset into the plane map.
                let hscroll_scroll_offset = hscroll % 16;
                let plane_x_offset = 0usize
                    .wrapping_sub(EXTRA_TILES)
                    .wrapping_sub((hscroll - hscroll_scroll_offset) / 8);

                let mut cursor = hscroll_scroll_offset;

                for j in 0..TILE_COLUMNS + EXTRA_TILES {
                    let vscroll = if rendering_window_plane {
                        0
                    } else {
                        match self.vscroll_mode {
                            VscrollMode::Full => usize::from(self.vsram[i]),
                            VscrollMode::TwoCell => usize::from(
                                self.vsram[(0usize
                                    .wrapping_sub(EXTRA_TILES)
                                    .wrapping_add(j)
                                    / 2)
                                    .wrapping_mul(2)
                                    .wrapping_add(i)
                                    % self.vsram.len()],
                            ),
                        }
                    };

                    let pixel_y_in_plane = vscroll.wrapping_add(scanline);
                    let tile_x = plane_x_offset.wrapping_add(j) & plane_width_bitmask;
                    let tile_y = (pixel_y_in_plane >> tile_height_power) & plane_height_bitmask;

                    self.render_tile(
                        pixel_y_in_plane,
                        tile_x,
                        tile_y,
                        plane_address,
                        effective_width,
                        tile_height_mask,
                        tile_size,
                        &mut plane_metapixels,
                        &mut cursor,
                    );
                }
            }

            // Draw the horizontal band of the window plane. The window
            // has a hardcoded size, unlike the other planes; Sonic 3's
            // 'Data Select' menu background relies on this.
            if !self.config.window_disabled {
                let boundary = usize::from(self.window.horizontal_boundary).min(TILE_COLUMNS);
                let (start, end) = if self.window.aligned_right {
                    (boundary, TILE_COLUMNS)
                } else {
                    (0, boundary)
                };

                let mut cursor = 16 + start * 8;
                let window_address = usize::from(self.window_address);

                for i in start..end {
                    self.render_tile(
                        scanline,
                        i,
                        scanline >> tile_height_power,
                        window_address,
                        window_plane_width,
                        tile_height_mask,
                        tile_size,
                        &mut plane_metapixels,
                        &mut cursor,
                    );
                }
            }

            // Draw the sprites.
            if self.sprite_row_cache_needs_updating {
                self.update_sprite_row_cache();
            }

            // A cleared sprite buffer tells the blitter which pixels have
            // not been claimed yet.
            let mut sprite_metapixels = [[0u8; 2]; SPRITE_BUFFER_SIZE];

            if !self.config.sprites_disabled {
                self.render_sprites(scanline, &mut sprite_metapixels);
            }

            // Blit the sprite pixels onto the plane pixels.
            if self.shadow_highlight_enabled {
                for (i, sprite) in sprite_metapixels
                    .iter()
                    .skip(MAX_SPRITE_WIDTH - 1)
                    .take(MAX_SCANLINE_WIDTH)
                    .enumerate()
                {
                    let plane = &mut plane_metapixels[16 + i];
                    *plane = self.constant.blit_lookup_shadow_highlight[usize::from(sprite[0])]
                        [usize::from(*plane)][usize::from(sprite[1])];
                }
            } else {
                for (i, sprite) in sprite_metapixels
                    .iter()
                    .skip(MAX_SPRITE_WIDTH - 1)
                    .take(MAX_SCANLINE_WIDTH)
                    .enumerate()
                {
                    let plane = &mut plane_metapixels[16 + i];
                    *plane = self.constant.blit_lookup[usize::from(sprite[0])]
                        [usize::from(*plane)][usize::from(sprite[1])]
                        & 0x3f;
                }
            }
        }

        let width = self.screen_width();
        let height = self.screen_height();
        video.scanline_rendered(scanline, &plane_metapixels[16..16 + width], width, height);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::factory::VideoOutput;
    use crate::video::blit::VdpConstant;
    use crate::video::vdp::{Vdp, VdpConfig};

    struct CapturedLine {
        pixels: Vec<u8>,
        width: usize,
        height: usize,
    }

    struct CaptureVideo {
        line: Option<CapturedLine>,
    }

    impl CaptureVideo {
        fn new() -> Self {
            CaptureVideo { line: None }
        }
    }

    impl VideoOutput for CaptureVideo {
        fn colour_updated(&mut self, _index: usize, _colour: u16) {}

        fn scanline_rendered(
            &mut self,
            _scanline: usize,
            pixels: &[u8],
            width: usize,
            height: usize,
        ) {
            self.line = Some(CapturedLine {
                pixels: pixels.to_vec(),
                width,
                height,
            });
        }
    }

    fn setup_vdp() -> Vdp {
        Vdp::new(VdpConfig::default(), Rc::new(VdpConstant::new()))
    }

    fn write_register(vdp: &mut Vdp, reg: u16, data: u16) {
        let mut video = CaptureVideo::new();
        vdp.write_control(0x8000 | (reg << 8) | data, &mut video);
    }

    fn write_vram_word(vdp: &mut Vdp, address: u16, value: u16) {
        let mut video = CaptureVideo::new();
        write_register(vdp, 15, 2);
        vdp.write_control(0x4000 | (address & 0x3fff), &mut video);
        vdp.write_control(address >> 14, &mut video);
        vdp.write_data(value, &mut video);
    }

    /// Writes a flat-colour tile (every pixel = `index`) at the given
    /// tile slot.
    fn write_flat_tile(vdp: &mut Vdp, tile_index: u16, index: u16) {
        let pattern = index << 12 | index << 8 | index << 4 | index;
        for row in 0..8 {
            write_vram_word(vdp, tile_index * 32 + row * 4, pattern);
            write_vram_word(vdp, tile_index * 32 + row * 4 + 2, pattern);
        }
    }

    #[test]
    fn disabled_display_renders_background_colour() {
        let mut vdp = setup_vdp();
        let mut video = CaptureVideo::new();
        write_register(&mut vdp, 7, 0x2a);
        vdp.render_scanline(0, &mut video);
        let line = video.line.unwrap();
        assert_eq!(256, line.width);
        assert_eq!(224, line.height);
        assert!(line.pixels.iter().all(|&pixel| pixel == 0x2a));
    }

    #[test]
    fn plane_a_tile_renders_palette_indices() {
        let mut vdp = setup_vdp();
        let mut video = CaptureVideo::new();
        write_register(&mut vdp, 1, 1 << 6); // display enable
        write_register(&mut vdp, 2, 0x38); // plane A at 0xe000
        write_register(&mut vdp, 4, 0x07); // plane B at 0xe000 too
        write_flat_tile(&mut vdp, 1, 5);
        // Plane map entry for tile column 0, palette line 1.
        write_vram_word(&mut vdp, 0xe000, (1 << 13) | 1);
        vdp.render_scanline(0, &mut video);
        let line = video.line.unwrap();
        // Palette line 1, index 5 => colour index 0x15.
        for x in 0..8 {
            assert_eq!(0x15, line.pixels[x]);
        }
        assert_eq!(0, line.pixels[8]);
    }

    #[test]
    fn sprite_masking_honours_earlier_sprite() {
        let mut vdp = setup_vdp();
        let mut video = CaptureVideo::new();
        write_register(&mut vdp, 1, 1 << 6);
        write_register(&mut vdp, 5, 0x02); // sprite table at 0x400
        write_flat_tile(&mut vdp, 2, 3);

        // Sprite 0: non-masking, pixels land at screen X 0x40 (raw X
        // carries the 0x80 bias).
        write_vram_word(&mut vdp, 0x400, 128 + 100); // Y: scanline 100
        write_vram_word(&mut vdp, 0x402, 0x0001); // 1x1, link 1
        write_vram_word(&mut vdp, 0x404, 2); // tile 2
        write_vram_word(&mut vdp, 0x406, 0xc0);
        // Sprite 1: masking sprite (X == 0).
        write_vram_word(&mut vdp, 0x408, 128 + 100);
        write_vram_word(&mut vdp, 0x40a, 0x0002); // link 2
        write_vram_word(&mut vdp, 0x40c, 2);
        write_vram_word(&mut vdp, 0x40e, 0x0);
        // Sprite 2: would draw at screen X 0x80, but is masked.
        write_vram_word(&mut vdp, 0x410, 128 + 100);
        write_vram_word(&mut vdp, 0x412, 0x0000); // link 0 ends the list
        write_vram_word(&mut vdp, 0x414, 2);
        write_vram_word(&mut vdp, 0x416, 0x100);

        vdp.render_scanline(100, &mut video);
        let line = video.line.unwrap();
        for x in 0x40..0x48 {
            assert_eq!(3, line.pixels[x], "sprite 0 pixel at {}", x);
        }
        for x in 0x80..0x88 {
            assert_eq!(0, line.pixels[x], "masked sprite pixel at {}", x);
        }
    }

    #[test]
    fn sprite_row_cache_rebuild_matches_table_cache() {
        let mut vdp = setup_vdp();
        let mut video = CaptureVideo::new();
        write_register(&mut vdp, 1, 1 << 6);
        write_register(&mut vdp, 5, 0x02);
        // A 1x2 sprite covering scanlines 10..26.
        write_vram_word(&mut vdp, 0x400, 128 + 10);
        write_vram_word(&mut vdp, 0x402, 0x0100); // height 2, link 0
        vdp.render_scanline(0, &mut video);
        assert_eq!(false, vdp.sprite_row_cache_needs_updating);
        assert_eq!(1, vdp.sprite_row_cache[10].total);
        assert_eq!(1, vdp.sprite_row_cache[25].total);
        assert_eq!(0, vdp.sprite_row_cache[26].total);
        assert_eq!(0, vdp.sprite_row_cache[9].total);
        assert_eq!(15, vdp.sprite_row_cache[25].sprites[0].y_in_sprite);
    }
}
