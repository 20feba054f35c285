// This file is part of cadmium.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

// SPEC: http://gendev.spritesmind.net/forum/viewtopic.php?p=6114#p6114
// SPEC: http://gendev.spritesmind.net/forum/viewtopic.php?p=6177#p6177

/// Detune offsets in phase-step units, indexed by key code and the low
/// two bits of the detune register field.
#[cfg_attr(rustfmt, rustfmt_skip)]
const DETUNE_TABLE: [[u32; 4]; 32] = [
    [0, 0,  1,  2], [0, 0,  1,  2], [0, 0,  1,  2], [0, 0,  1,  2],
    [0, 1,  2,  2], [0, 1,  2,  3], [0, 1,  2,  3], [0, 1,  2,  3],
    [0, 1,  2,  4], [0, 1,  3,  4], [0, 1,  3,  4], [0, 1,  3,  5],
    [0, 2,  4,  5], [0, 2,  4,  6], [0, 2,  4,  6], [0, 2,  5,  7],
    [0, 2,  5,  8], [0, 3,  6,  8], [0, 3,  6,  9], [0, 3,  7, 10],
    [0, 4,  8, 11], [0, 4,  8, 12], [0, 4,  9, 13], [0, 5, 10, 14],
    [0, 5, 11, 16], [0, 6, 12, 17], [0, 6, 13, 19], [0, 7, 14, 20],
    [0, 8, 16, 22], [0, 8, 16, 22], [0, 8, 16, 22], [0, 8, 16, 22],
];

/// The sine table triples as a sine wave lookup table, a logarithm lookup
/// table and an attenuation lookup table: it holds a quarter of a sine
/// oscillation converted to 4.8 fixed-point base-2 logarithmic
/// attenuation. The power table undoes the logarithm, mapping an 8-bit
/// fraction to an 11-bit linear value.
pub struct FmOperatorConstant {
    logarithmic_attenuation_sine_table: [u16; 0x100],
    power_table: [u16; 0x100],
}

impl FmOperatorConstant {
    pub fn new() -> Self {
        let mut logarithmic_attenuation_sine_table = [0; 0x100];
        let mut power_table = [0; 0x100];

        for (i, entry) in logarithmic_attenuation_sine_table.iter_mut().enumerate() {
            // The phase is treated as a 9-bit index with the LSB fixed to
            // 1, so that the quarter table mirrors cleanly and a phase of
            // 0 (invalid input to a logarithm) never occurs.
            let phase_normalised = ((i << 1) + 1) as f64 / (0x100 << 1) as f64;
            let sine = (phase_normalised * std::f64::consts::FRAC_PI_2).sin();
            // Storing attenuation as a logarithm turns the envelope
            // multiply into an addition.
            let attenuation = -sine.ln() / 2f64.ln();
            *entry = (attenuation * 256.0 + 0.5) as u16;
        }

        for (i, entry) in power_table.iter_mut().enumerate() {
            // Normalised from i+1 so that the result stays within 11 bits.
            let entry_normalised = (i + 1) as f64 / 0x100 as f64;
            *entry = (2f64.powf(-entry_normalised) * 2048.0 + 0.5) as u16;
        }

        FmOperatorConstant {
            logarithmic_attenuation_sine_table,
            power_table,
        }
    }

    fn inverse_pow2(&self, value: u32) -> u32 {
        let whole = value >> 8;
        let fraction = value & 0xff;
        (u32::from(self.power_table[fraction as usize]) << 2) >> whole
    }
}

impl Default for FmOperatorConstant {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FmOperator {
    // Phase generator
    position: u32,
    step: u32,
    pub(crate) f_number_and_block: u16,
    pub(crate) detune: u8,
    pub(crate) multiplier: u8,
    // Envelope generator parameter latch
    pub(crate) key_on: bool,
    pub(crate) total_level: u8,
    pub(crate) key_scale: u8,
    pub(crate) attack_rate: u8,
    pub(crate) decay_rate: u8,
    pub(crate) sustain_rate: u8,
    pub(crate) sustain_level: u8,
    pub(crate) release_rate: u8,
}

impl FmOperator {
    pub fn new() -> Self {
        FmOperator {
            position: 0,
            step: 0,
            f_number_and_block: 0,
            detune: 0,
            multiplier: 0,
            key_on: false,
            key_scale: 0,
            attack_rate: 0,
            decay_rate: 0,
            sustain_rate: 0,
            sustain_level: 0,
            release_rate: 0,
            // Silence the operator on startup.
            total_level: 0x7f,
        }
    }

    pub fn set_frequency(&mut self, f_number_and_block: u16) {
        self.f_number_and_block = f_number_and_block & 0x3fff;
        self.refresh_step();
    }

    pub fn set_detune_and_multiplier(&mut self, detune: u8, multiplier: u8) {
        self.detune = detune;
        self.multiplier = multiplier;
        self.refresh_step();
    }

    pub fn set_key_on(&mut self, key_on: bool) {
        self.key_on = key_on;
    }

    pub fn set_total_level(&mut self, total_level: u8) {
        self.total_level = total_level;
    }

    pub fn set_key_scale_and_attack_rate(&mut self, key_scale: u8, attack_rate: u8) {
        self.key_scale = key_scale;
        self.attack_rate = attack_rate;
    }

    pub fn set_decay_rate(&mut self, decay_rate: u8) {
        self.decay_rate = decay_rate;
    }

    pub fn set_sustain_rate(&mut self, sustain_rate: u8) {
        self.sustain_rate = sustain_rate;
    }

    pub fn set_sustain_level_and_release_rate(&mut self, sustain_level: u8, release_rate: u8) {
        self.sustain_level = sustain_level;
        self.release_rate = release_rate;
    }

    /// Key code selects the detune row: the block plus a two-bit
    /// approximation of the F-number's magnitude.
    fn key_code(&self) -> usize {
        let f_number = u32::from(self.f_number_and_block) & 0x7ff;
        let block = (u32::from(self.f_number_and_block) >> 11) & 7;
        let f11 = (f_number >> 10) & 1;
        let f10 = (f_number >> 9) & 1;
        let f9 = (f_number >> 8) & 1;
        let f8 = (f_number >> 7) & 1;
        let n3 = (f11 & (f10 | f9 | f8)) | (!f11 & f10 & f9 & f8 & 1);
        ((block << 2) | (f11 << 1) | n3) as usize
    }

    fn refresh_step(&mut self) {
        let f_number = u32::from(self.f_number_and_block) & 0x7ff;
        let block = (u32::from(self.f_number_and_block) >> 11) & 7;

        let mut step = (f_number << block) >> 1;

        let detune_value = DETUNE_TABLE[self.key_code()][(self.detune & 3) as usize];
        if self.detune & 4 != 0 {
            step = step.wrapping_sub(detune_value);
        } else {
            step += detune_value;
        }
        step &= 0x1ffff;

        // A multiplier of 0 means one half.
        if self.multiplier == 0 {
            step /= 2;
        } else {
            step *= u32::from(self.multiplier);
        }

        self.step = step & 0xfffff;
    }

    /// Advances the 20-bit phase accumulator and returns the 10-bit phase.
    fn increment_phase(&mut self) -> u32 {
        self.position = (self.position + self.step) & 0xfffff;
        self.position >> 10
    }

    pub fn process(&mut self, constant: &FmOperatorConstant, phase_modulation: i32) -> i32 {
        let phase = self.increment_phase();

        // The phase modulation is 15-bit, but the phase itself is 10-bit.
        let phase_modulation_10_bit = phase_modulation / (1 << 5);

        let modulated_phase = ((phase as i32 + phase_modulation_10_bit) & 0x3ff) as u32;

        // Reduce the phase down to a single quarter of the span of a sine
        // wave; the other three quarters are mirrored from it.
        let phase_is_negative = modulated_phase & 0x200 != 0;
        let phase_is_mirrored = modulated_phase & 0x100 != 0;
        let quarter_phase = ((modulated_phase & 0xff) ^ if phase_is_mirrored { 0xff } else { 0 }) as usize;

        let phase_as_attenuation = u32::from(constant.logarithmic_attenuation_sine_table[quarter_phase]);

        // Both attenuations are logarithms, so attenuating one by the
        // other is an addition rather than a multiplication.
        let combined_attenuation = phase_as_attenuation + (u32::from(self.total_level) << 2);

        let attenuation_linearised = (constant.inverse_pow2(combined_attenuation) & 0x1fff) as i32;

        if phase_is_negative {
            -attenuation_linearised
        } else {
            attenuation_linearised
        }
    }
}

impl Default for FmOperator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_table_is_monotonic_attenuation() {
        let constant = FmOperatorConstant::new();
        // Attenuation falls as the quarter phase approaches the sine peak.
        for i in 1..0x100 {
            assert!(
                constant.logarithmic_attenuation_sine_table[i]
                    <= constant.logarithmic_attenuation_sine_table[i - 1]
            );
        }
        assert_eq!(0, constant.logarithmic_attenuation_sine_table[0xff]);
    }

    #[test]
    fn power_table_is_11_bit() {
        let constant = FmOperatorConstant::new();
        for &entry in constant.power_table.iter() {
            assert!(entry <= 0x7ff);
        }
        assert_eq!(0x400, constant.power_table[0xff]);
    }

    #[test]
    fn full_volume_operator_peaks_near_13_bits() {
        let constant = FmOperatorConstant::new();
        let mut operator = FmOperator::new();
        operator.set_total_level(0);
        // Quarter-wave peak: drive the phase to 0x100 where the mirrored
        // lookup lands on the lowest attenuation entry.
        operator.set_frequency(0x100);
        operator.set_detune_and_multiplier(0, 1);
        let mut peak = 0;
        for _ in 0..0x1000 {
            peak = peak.max(operator.process(&constant, 0));
        }
        assert!(peak > 0x1f00 && peak <= 0x1fff);
    }

    #[test]
    fn zero_step_operator_holds_phase() {
        let constant = FmOperatorConstant::new();
        let mut operator = FmOperator::new();
        operator.set_frequency(0);
        operator.set_detune_and_multiplier(0, 1);
        let first = operator.process(&constant, 0);
        let second = operator.process(&constant, 0);
        assert_eq!(first, second);
    }
}
