pub trait BitOps<T> {
    fn get_bit(&self, bit: T) -> bool;
    fn set_bit(&mut self, bit: T);
    fn clear_bit(&mut self, bit: T);

    fn assign_bit(&mut self, bit: T, value: bool) {
        if value {
            self.set_bit(bit)
        } else {
            self.clear_bit(bit)
        }
    }
}

impl BitOps<u8> for u8 {
    fn get_bit(&self, bit: u8) -> bool {
        (self & (1 << bit)) != 0
    }

    fn set_bit(&mut self, bit: u8) {
        *self |= 1 << bit
    }

    fn clear_bit(&mut self, bit: u8) {
        *self &= !(1 << bit)
    }
}

#[cfg(test)]
mod tests {
    use super::BitOps;

    #[test]
    fn assign_bit_sets_and_clears() {
        let mut byte = 0b0000_0001u8;
        byte.assign_bit(7, true);
        assert_eq!(byte, 0b1000_0001);
        byte.assign_bit(0, false);
        assert_eq!(byte, 0b1000_0000);
        assert!(byte.get_bit(7));
        assert!(!byte.get_bit(6));
    }
}
