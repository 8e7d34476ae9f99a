use crate::grid::{Coord, Direction};

/// A snake body on the grid, head first
///
/// Movement is a fixed-size shift: every segment takes the previous position
/// of the segment in front of it, so the body never changes length except
/// through [`Snake::grow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snake {
    body: Vec<Coord>,
    direction: Direction,
    paused: bool,
}

impl Snake {
    /// Lays out a straight snake of `length` cells trailing behind `head`
    pub fn spawn(head: Coord, length: usize, direction: Direction) -> Self {
        let behind = direction.opposite();
        let mut body = Vec::with_capacity(length);
        let mut cell = head;
        for _ in 0..length.max(1) {
            body.push(cell);
            cell = cell.step(behind);
        }

        Self {
            body,
            direction,
            paused: false,
        }
    }

    /// Wraps a body received from the server
    pub fn from_body(body: Vec<Coord>, direction: Direction) -> Self {
        Self {
            body,
            direction,
            paused: false,
        }
    }

    pub fn head(&self) -> Coord {
        self.body[0]
    }

    pub fn body(&self) -> &[Coord] {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Moves the snake one cell along its current direction
    pub fn advance(&mut self) {
        if self.paused || self.body.is_empty() {
            return;
        }

        let new_head = self.body[0].step(self.direction);
        for i in (1..self.body.len()).rev() {
            self.body[i] = self.body[i - 1];
        }
        self.body[0] = new_head;
    }

    /// Appends a copy of the tail; the next advance turns it into a new cell
    pub fn grow(&mut self) {
        if let Some(&tail) = self.body.last() {
            self.body.push(tail);
        }
    }

    /// Sets the direction with no reversal check (authoritative side)
    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    /// Sets the direction unless it would turn the snake back on itself
    ///
    /// Returns true if the direction actually changed.
    pub fn steer(&mut self, direction: Direction) -> bool {
        if direction == self.direction || direction.is_opposite(self.direction) {
            return false;
        }
        self.direction = direction;
        true
    }

    /// True if any segment, head included, occupies `cell`
    pub fn overlaps(&self, cell: Coord) -> bool {
        self.body.contains(&cell)
    }

    /// True if the head shares a cell with any other segment
    pub fn hits_itself(&self) -> bool {
        match self.body.split_first() {
            Some((head, rest)) => rest.contains(head),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snake_at(x: i32, y: i32) -> Snake {
        Snake::spawn(Coord::new(x, y), 6, Direction::Right)
    }

    #[test]
    fn test_spawn_trails_behind_head() {
        let snake = snake_at(10, 5);
        assert_eq!(snake.len(), 6);
        assert_eq!(snake.head(), Coord::new(10, 5));
        assert_eq!(snake.body()[5], Coord::new(5, 5));
        assert_eq!(snake.direction(), Direction::Right);
    }

    #[test]
    fn test_advance_shifts_every_segment() {
        let mut snake = snake_at(10, 5);
        let before = snake.body().to_vec();
        snake.advance();

        assert_eq!(snake.head(), Coord::new(11, 5));
        assert_eq!(&snake.body()[1..], &before[..5]);
        assert_eq!(snake.len(), 6);
    }

    #[test]
    fn test_advance_follows_turns() {
        let mut snake = snake_at(10, 5);
        snake.set_direction(Direction::Down);
        snake.advance();
        assert_eq!(snake.head(), Coord::new(10, 6));
        assert_eq!(snake.body()[1], Coord::new(10, 5));
        assert_eq!(snake.body()[2], Coord::new(9, 5));
    }

    #[test]
    fn test_growth_adds_exactly_one_cell() {
        let mut snake = snake_at(10, 5);
        snake.grow();
        assert_eq!(snake.len(), 7);
        assert_eq!(snake.body()[5], snake.body()[6]);

        snake.advance();
        assert_eq!(snake.len(), 7);
        // the duplicate has separated from the old tail
        assert_ne!(snake.body()[5], snake.body()[6]);
        assert_eq!(snake.body()[6], Coord::new(5, 5));
    }

    #[test]
    fn test_growth_is_monotonic() {
        let mut snake = snake_at(10, 5);
        let mut last = snake.len();
        for step in 0..20 {
            if step % 4 == 0 {
                snake.grow();
            }
            snake.advance();
            assert!(snake.len() >= last);
            last = snake.len();
        }
        assert_eq!(snake.len(), 11);
    }

    #[test]
    fn test_steer_rejects_reversal() {
        let mut snake = snake_at(10, 5);
        assert!(!snake.steer(Direction::Left));
        assert_eq!(snake.direction(), Direction::Right);

        assert!(snake.steer(Direction::Up));
        assert!(snake.steer(Direction::Left));
        assert_eq!(snake.direction(), Direction::Left);
    }

    #[test]
    fn test_set_direction_is_unconditional() {
        let mut snake = snake_at(10, 5);
        snake.set_direction(Direction::Left);
        assert_eq!(snake.direction(), Direction::Left);

        // reversing straight into the neck is a self collision
        snake.advance();
        assert!(snake.hits_itself());
    }

    #[test]
    fn test_self_collision_after_loop() {
        let mut snake = snake_at(10, 5);
        for d in [Direction::Down, Direction::Left, Direction::Up] {
            snake.set_direction(d);
            snake.advance();
        }
        assert_eq!(snake.head(), Coord::new(9, 5));
        assert!(snake.hits_itself());
    }

    #[test]
    fn test_paused_snake_does_not_move() {
        let mut snake = snake_at(10, 5);
        snake.set_paused(true);
        snake.advance();
        assert_eq!(snake.head(), Coord::new(10, 5));
        snake.set_paused(false);
        snake.advance();
        assert_eq!(snake.head(), Coord::new(11, 5));
    }

    #[test]
    fn test_overlaps() {
        let snake = snake_at(10, 5);
        assert!(snake.overlaps(Coord::new(7, 5)));
        assert!(!snake.overlaps(Coord::new(11, 5)));
    }
}
