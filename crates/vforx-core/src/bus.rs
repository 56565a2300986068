/// Left/right audio block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StereoBuffer {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl StereoBuffer {
    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
    }

    pub fn len(&self) -> usize {
        self.left.len().min(self.right.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, left: f32, right: f32) {
        self.left.push(left);
        self.right.push(right);
    }
}

/// Two-sided summing bus in front of the audio sink.
///
/// One input per occupied port; the downmix divides by the number of ports so a
/// full bus cannot clip harder than a single channel.
#[derive(Debug)]
pub struct AudioBus {
    inputs: Vec<StereoBuffer>,
    gain: f32,
}

impl AudioBus {
    pub fn new(gain: f32) -> Self {
        Self {
            inputs: Vec::new(),
            gain,
        }
    }

    pub fn ports(&self) -> usize {
        self.inputs.len()
    }

    pub fn set_ports(&mut self, ports: usize) {
        self.inputs.resize_with(ports, StereoBuffer::default);
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    pub fn input_mut(&mut self, port: usize) -> Option<&mut StereoBuffer> {
        self.inputs.get_mut(port)
    }

    /// Sums every port into `out`, shorter inputs padded with silence, and clears the inputs.
    pub fn mix(&mut self, out: &mut StereoBuffer) {
        out.clear();
        let len = self.inputs.iter().map(StereoBuffer::len).max().unwrap_or(0);
        out.left.resize(len, 0.0);
        out.right.resize(len, 0.0);
        if self.inputs.is_empty() {
            return;
        }
        let scale = self.gain / self.inputs.len() as f32;
        for input in self.inputs.iter_mut() {
            for (dst, v) in out.left.iter_mut().zip(input.left.iter()) {
                *dst += *v * scale;
            }
            for (dst, v) in out.right.iter_mut().zip(input.right.iter()) {
                *dst += *v * scale;
            }
            input.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_scales_by_port_count_and_pads() {
        let mut bus = AudioBus::new(1.0);
        bus.set_ports(2);
        if let Some(a) = bus.input_mut(0) {
            a.left = vec![1.0, 1.0];
            a.right = vec![0.0, 0.0];
        }
        if let Some(b) = bus.input_mut(1) {
            b.left = vec![1.0];
            b.right = vec![1.0];
        }
        let mut out = StereoBuffer::default();
        bus.mix(&mut out);
        assert_eq!(out.left, vec![1.0, 0.5]);
        assert_eq!(out.right, vec![0.5, 0.0]);
        assert!(bus.input_mut(0).is_some_and(|b| b.is_empty()));
        assert!(bus.input_mut(2).is_none());
    }
}
