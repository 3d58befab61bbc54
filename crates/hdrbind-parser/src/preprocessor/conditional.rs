//! Conditional Compilation Stack
//!
//! Tracks `#if`/`#elif`/`#else`/`#endif` nesting. Conditions of branches that
//! cannot become active are never evaluated, so the caller asks
//! [`ConditionalStack::wants_condition`] before evaluating an `#elif`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionalError {
    #[error("#{0} without matching #if")]
    Unmatched(&'static str),

    #[error("#{0} after #else")]
    AfterElse(&'static str),
}

#[derive(Debug, Clone)]
struct Frame {
    /// Enclosing region is active
    parent_active: bool,
    /// Some branch of this group has already been taken
    taken: bool,
    /// Current branch is active
    active: bool,
    seen_else: bool,
    /// Line of the opening `#if`
    line: u32,
}

/// Stack of open conditional groups in one header
#[derive(Debug, Clone, Default)]
pub struct ConditionalStack {
    frames: Vec<Frame>,
}

impl ConditionalStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether text at the current position is compiled
    pub fn is_active(&self) -> bool {
        self.frames.last().map_or(true, |f| f.active)
    }

    /// Open a group. `cond` is ignored when the enclosing region is inactive.
    pub fn push_if(&mut self, cond: bool, line: u32) {
        let parent_active = self.is_active();
        let active = parent_active && cond;
        self.frames.push(Frame {
            parent_active,
            taken: active,
            active,
            seen_else: false,
            line,
        });
    }

    /// Whether an `#elif` at this point needs its condition evaluated
    pub fn wants_condition(&self) -> bool {
        self.frames
            .last()
            .map_or(false, |f| f.parent_active && !f.taken && !f.seen_else)
    }

    pub fn elif(&mut self, cond: bool) -> Result<(), ConditionalError> {
        let frame = self
            .frames
            .last_mut()
            .ok_or(ConditionalError::Unmatched("elif"))?;
        if frame.seen_else {
            return Err(ConditionalError::AfterElse("elif"));
        }
        frame.active = frame.parent_active && !frame.taken && cond;
        frame.taken |= frame.active;
        Ok(())
    }

    pub fn else_branch(&mut self) -> Result<(), ConditionalError> {
        let frame = self
            .frames
            .last_mut()
            .ok_or(ConditionalError::Unmatched("else"))?;
        if frame.seen_else {
            return Err(ConditionalError::AfterElse("else"));
        }
        frame.seen_else = true;
        frame.active = frame.parent_active && !frame.taken;
        frame.taken = true;
        Ok(())
    }

    pub fn endif(&mut self) -> Result<(), ConditionalError> {
        self.frames
            .pop()
            .map(|_| ())
            .ok_or(ConditionalError::Unmatched("endif"))
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Close every open group, returning the lines that opened them
    pub fn drain_unterminated(&mut self) -> Vec<u32> {
        self.frames.drain(..).map(|f| f.line).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_if_elif_else_chain() {
        let mut stack = ConditionalStack::new();
        stack.push_if(false, 1);
        assert!(!stack.is_active());
        assert!(stack.wants_condition());

        stack.elif(true).unwrap();
        assert!(stack.is_active());
        assert!(!stack.wants_condition());

        stack.elif(true).unwrap();
        assert!(!stack.is_active(), "only the first true branch is taken");

        stack.else_branch().unwrap();
        assert!(!stack.is_active());

        stack.endif().unwrap();
        assert!(stack.is_active());
    }

    #[test]
    fn test_nested_in_inactive_region() {
        let mut stack = ConditionalStack::new();
        stack.push_if(false, 1);
        stack.push_if(true, 2);
        assert!(!stack.is_active());
        assert!(!stack.wants_condition());
        stack.else_branch().unwrap();
        assert!(!stack.is_active());
        stack.endif().unwrap();
        stack.else_branch().unwrap();
        assert!(stack.is_active());
    }

    #[test]
    fn test_unbalanced() {
        let mut stack = ConditionalStack::new();
        assert_eq!(stack.endif(), Err(ConditionalError::Unmatched("endif")));
        assert_eq!(stack.else_branch(), Err(ConditionalError::Unmatched("else")));

        stack.push_if(true, 4);
        stack.else_branch().unwrap();
        assert_eq!(stack.elif(true), Err(ConditionalError::AfterElse("elif")));
        assert_eq!(stack.drain_unterminated(), vec![4]);
        assert_eq!(stack.depth(), 0);
    }
}
