// This file is part of cadmium.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use super::fm_operator::{FmOperator, FmOperatorConstant};

pub struct FmChannel {
    pub(crate) operators: [FmOperator; 4],
    // Stored as `9 - raw`, so that a raw feedback of 0 maps to a shift
    // that the sample path treats as "no feedback".
    pub(crate) feedback: u8,
    pub(crate) algorithm: u8,
    pub(crate) operator_1_previous_samples: [i32; 2],
}

impl FmChannel {
    pub fn new() -> Self {
        FmChannel {
            operators: [
                FmOperator::new(),
                FmOperator::new(),
                FmOperator::new(),
                FmOperator::new(),
            ],
            feedback: 9,
            algorithm: 0,
            operator_1_previous_samples: [0; 2],
        }
    }

    pub fn set_frequency(&mut self, f_number_and_block: u16) {
        for operator in self.operators.iter_mut() {
            operator.set_frequency(f_number_and_block);
        }
    }

    pub fn set_feedback_and_algorithm(&mut self, feedback: u8, algorithm: u8) {
        self.feedback = 9 - feedback;
        self.algorithm = algorithm;
    }

    pub fn set_key_on(&mut self, operator_index: usize, key_on: bool) {
        self.operators[operator_index].set_key_on(key_on);
    }

    pub fn set_detune_and_multiplier(&mut self, operator_index: usize, detune: u8, multiplier: u8) {
        self.operators[operator_index].set_detune_and_multiplier(detune, multiplier);
    }

    pub fn set_total_level(&mut self, operator_index: usize, total_level: u8) {
        self.operators[operator_index].set_total_level(total_level);
    }

    pub fn set_key_scale_and_attack_rate(&mut self, operator_index: usize, key_scale: u8, attack_rate: u8) {
        self.operators[operator_index].set_key_scale_and_attack_rate(key_scale, attack_rate);
    }

    pub fn set_decay_rate(&mut self, operator_index: usize, decay_rate: u8) {
        self.operators[operator_index].set_decay_rate(decay_rate);
    }

    pub fn set_sustain_rate(&mut self, operator_index: usize, sustain_rate: u8) {
        self.operators[operator_index].set_sustain_rate(sustain_rate);
    }

    pub fn set_sustain_level_and_release_rate(&mut self, operator_index: usize, sustain_level: u8, release_rate: u8) {
        self.operators[operator_index].set_sustain_level_and_release_rate(sustain_level, release_rate);
    }

    pub fn get_sample(&mut self, constant: &FmOperatorConstant) -> i32 {
        // Compute operator 1's self-feedback modulation.
        let feedback_modulation = if self.feedback == 9 {
            0
        } else {
            (self.operator_1_previous_samples[0] + self.operator_1_previous_samples[1])
                >> self.feedback
        };

        // Note that operators 2 and 3 really are swapped.
        const OP1: usize = 0;
        const OP2: usize = 2;
        const OP3: usize = 1;
        const OP4: usize = 3;

        // Feed the operators into each other to produce the final sample.
        // The operators output a 14-bit sample, so even the sum of all
        // four stays within 16 bits.
        let operator_1_sample;
        let sample = match self.algorithm {
            0 => {
                // "Four serial connection mode".
                operator_1_sample = self.operators[OP1].process(constant, feedback_modulation);
                let operator_2_sample = self.operators[OP2].process(constant, operator_1_sample);
                let operator_3_sample = self.operators[OP3].process(constant, operator_2_sample);
                self.operators[OP4].process(constant, operator_3_sample)
            }
            1 => {
                // "Three double modulation serial connection mode".
                operator_1_sample = self.operators[OP1].process(constant, feedback_modulation);
                let operator_2_sample = self.operators[OP2].process(constant, 0);
                let operator_3_sample = self.operators[OP3]
                    .process(constant, operator_1_sample + operator_2_sample);
                self.operators[OP4].process(constant, operator_3_sample)
            }
            2 => {
                // "Double modulation mode (1)".
                operator_1_sample = self.operators[OP1].process(constant, feedback_modulation);
                let operator_2_sample = self.operators[OP2].process(constant, 0);
                let operator_3_sample = self.operators[OP3].process(constant, operator_2_sample);
                self.operators[OP4].process(constant, operator_1_sample + operator_3_sample)
            }
            3 => {
                // "Double modulation mode (2)".
                operator_1_sample = self.operators[OP1].process(constant, feedback_modulation);
                let operator_2_sample = self.operators[OP2].process(constant, operator_1_sample);
                let operator_3_sample = self.operators[OP3].process(constant, 0);
                self.operators[OP4].process(constant, operator_2_sample + operator_3_sample)
            }
            4 => {
                // "Two serial connection and two parallel modes".
                operator_1_sample = self.operators[OP1].process(constant, feedback_modulation);
                let operator_2_sample = self.operators[OP2].process(constant, operator_1_sample);
                let operator_3_sample = self.operators[OP3].process(constant, 0);
                let operator_4_sample = self.operators[OP4].process(constant, operator_3_sample);
                operator_2_sample + operator_4_sample
            }
            5 => {
                // "Common modulation 3 parallel mode".
                operator_1_sample = self.operators[OP1].process(constant, feedback_modulation);
                let operator_2_sample = self.operators[OP2].process(constant, operator_1_sample);
                let operator_3_sample = self.operators[OP3].process(constant, operator_1_sample);
                let operator_4_sample = self.operators[OP4].process(constant, operator_1_sample);
                operator_2_sample + operator_3_sample + operator_4_sample
            }
            6 => {
                // "Two serial connection + two sine mode".
                operator_1_sample = self.operators[OP1].process(constant, feedback_modulation);
                let operator_2_sample = self.operators[OP2].process(constant, operator_1_sample);
                let operator_3_sample = self.operators[OP3].process(constant, 0);
                let operator_4_sample = self.operators[OP4].process(constant, 0);
                operator_2_sample + operator_3_sample + operator_4_sample
            }
            _ => {
                // "Four parallel sine synthesis mode".
                operator_1_sample = self.operators[OP1].process(constant, feedback_modulation);
                let operator_2_sample = self.operators[OP2].process(constant, 0);
                let operator_3_sample = self.operators[OP3].process(constant, 0);
                let operator_4_sample = self.operators[OP4].process(constant, 0);
                operator_1_sample + operator_2_sample + operator_3_sample + operator_4_sample
            }
        };

        // Update the feedback values.
        self.operator_1_previous_samples[1] = self.operator_1_previous_samples[0];
        self.operator_1_previous_samples[0] = operator_1_sample;

        sample.max(-0x1fff).min(0x1fff) * 4
    }
}

impl Default for FmChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_channel() -> (FmOperatorConstant, FmChannel) {
        (FmOperatorConstant::new(), FmChannel::new())
    }

    #[test]
    fn feedback_is_stored_inverted() {
        let (_, mut channel) = setup_channel();
        channel.set_feedback_and_algorithm(0, 4);
        assert_eq!(9, channel.feedback);
        assert_eq!(4, channel.algorithm);
        channel.set_feedback_and_algorithm(7, 0);
        assert_eq!(2, channel.feedback);
    }

    #[test]
    fn sample_is_clamped_to_14_bits_times_4() {
        let (constant, mut channel) = setup_channel();
        channel.set_feedback_and_algorithm(0, 7);
        for operator_index in 0..4 {
            channel.set_total_level(operator_index, 0);
            channel.set_detune_and_multiplier(operator_index, 0, 1);
        }
        channel.set_frequency(0x22ff);
        for _ in 0..0x2000 {
            let sample = channel.get_sample(&constant);
            assert!(sample >= -0x1fff * 4 && sample <= 0x1fff * 4);
        }
    }

    #[test]
    fn operator_1_history_shifts() {
        let (constant, mut channel) = setup_channel();
        channel.set_feedback_and_algorithm(7, 7);
        channel.set_total_level(0, 0);
        channel.set_detune_and_multiplier(0, 0, 1);
        channel.set_frequency(0x1a00);
        channel.get_sample(&constant);
        let first = channel.operator_1_previous_samples[0];
        channel.get_sample(&constant);
        assert_eq!(first, channel.operator_1_previous_samples[1]);
    }
}
